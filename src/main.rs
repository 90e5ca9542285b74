use anyhow::Context;
use broker_ui::{
    config::{Config, LoggingConfig},
    messaging::{
        detect_provider_from_url, init_messaging_metrics, parse_provider_type, ProviderFactory,
        ProviderType,
    },
    models::NewServer,
    services::{DashboardMonitor, MessageService, ServerService},
    state::create_repository,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "broker-ui")]
#[command(about = "Manage broker servers and move messages through them", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored servers
    #[command(subcommand)]
    Servers(ServerCommand),

    /// Manage publishing topics of a server
    #[command(subcommand)]
    Topics(TopicCommand),

    /// Manage subscriptions of a server
    #[command(subcommand)]
    Subscriptions(SubscriptionCommand),

    /// Guess the provider type of a connection URL
    Detect {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// List provider types with a working adapter
    Providers,

    /// Publish one message through a stored server
    Publish {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,

        #[arg(value_name = "SUBJECT")]
        subject: String,

        #[arg(value_name = "PAYLOAD")]
        payload: String,
    },

    /// Print deliveries for a subject pattern until Ctrl-C
    Subscribe {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,

        #[arg(value_name = "PATTERN")]
        pattern: String,

        /// Subscription name used for history and counters
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ServerCommand {
    /// List servers
    List,

    /// Add a server
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        url: String,

        /// Provider type; detected from the URL when omitted
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Edit a server
    Update {
        #[arg(value_name = "SERVER_ID")]
        id: u64,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Remove a server with its topics and subscriptions
    Remove {
        #[arg(value_name = "SERVER_ID")]
        id: u64,
    },
}

#[derive(Subcommand)]
enum TopicCommand {
    List {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
    },
    Add {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
        #[arg(value_name = "NAME")]
        name: String,
    },
    Remove {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Subcommand)]
enum SubscriptionCommand {
    List {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
    },
    Add {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(value_name = "PATTERN")]
        pattern: String,
    },
    Remove {
        #[arg(value_name = "SERVER_ID")]
        server_id: u64,
        #[arg(value_name = "NAME")]
        name: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("broker_ui={}", logging.level).into());

    let json_layer = logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!logging.json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn provider_for(provider: Option<&str>, url: &str) -> anyhow::Result<ProviderType> {
    match provider {
        Some(name) => Ok(parse_provider_type(name)?),
        None => Ok(detect_provider_from_url(url)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config.logging);
    init_messaging_metrics();

    tracing::debug!("Starting broker-ui v{}", env!("CARGO_PKG_VERSION"));

    let repository = create_repository(&config.storage).context("failed to open storage")?;
    let servers = ServerService::new(repository.clone(), ProviderFactory::new(config.providers.clone()));
    let messages = MessageService::new(repository);

    match cli.command {
        Commands::Servers(command) => match command {
            ServerCommand::List => {
                for server in servers.get_all_servers().await? {
                    println!("{}\t{}\t{}\t{}", server.id, server.provider_type, server.name, server.url);
                }
            }
            ServerCommand::Add { name, url, provider } => {
                let provider_type = provider_for(provider.as_deref(), &url)?;
                let server = servers.save_server(NewServer::new(name, url, provider_type)).await?;
                println!("Saved server {} ({})", server.id, server.provider_type);
            }
            ServerCommand::Update {
                id,
                name,
                url,
                provider,
            } => {
                let provider_type = provider_for(provider.as_deref(), &url)?;
                let server = servers
                    .update_server(id, NewServer::new(name, url, provider_type))
                    .await?;
                println!("Updated server {}", server.id);
            }
            ServerCommand::Remove { id } => {
                servers.delete_server(id).await?;
                println!("Removed server {}", id);
            }
        },

        Commands::Topics(command) => match command {
            TopicCommand::List { server_id } => {
                for topic in servers.get_topics_for_server(server_id).await? {
                    println!("{}\t{}", topic.id, topic.name);
                }
            }
            TopicCommand::Add { server_id, name } => {
                let topic = messages.save_topic(server_id, &name).await?;
                println!("Saved topic {}", topic.id);
            }
            TopicCommand::Remove { server_id, name } => {
                messages.delete_topic(&name, server_id).await?;
                println!("Removed topic {}", name);
            }
        },

        Commands::Subscriptions(command) => match command {
            SubscriptionCommand::List { server_id } => {
                for subscription in servers.get_subscriptions_for_server(server_id).await? {
                    println!(
                        "{}\t{}\t{}",
                        subscription.id, subscription.name, subscription.subject_pattern
                    );
                }
            }
            SubscriptionCommand::Add {
                server_id,
                name,
                pattern,
            } => {
                let subscription = messages.save_subscription(server_id, &name, &pattern).await?;
                println!("Saved subscription {}", subscription.id);
            }
            SubscriptionCommand::Remove { server_id, name } => {
                messages.delete_subscription(&name, server_id, None).await?;
                println!("Removed subscription {}", name);
            }
        },

        Commands::Detect { url } => {
            println!("{}", detect_provider_from_url(&url));
        }

        Commands::Providers => {
            for provider_type in servers.supported_providers() {
                println!("{}", provider_type);
            }
        }

        Commands::Publish {
            server_id,
            subject,
            payload,
        } => {
            let provider = servers.connect_by_id(server_id).await?;
            let result = messages
                .publish_message(provider.as_ref(), &subject, &payload)
                .await;
            servers.disconnect_from_server(server_id).await?;
            result?;
            println!("Published to {}", subject);
        }

        Commands::Subscribe {
            server_id,
            pattern,
            name,
        } => {
            let provider = servers.connect_by_id(server_id).await?;
            let name = name.unwrap_or_else(|| pattern.clone());
            let (tx, mut rx) = mpsc::channel(config.service.delivery_channel_capacity.max(1));

            messages
                .subscribe(provider.as_ref(), &name, &pattern, Some(tx))
                .await?;
            let monitor = DashboardMonitor::start(messages.clone(), config.service.dashboard_refresh());
            let mut dashboard = monitor.subscribe();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    message = rx.recv() => match message {
                        Some(message) => println!("{}", message),
                        None => break,
                    },
                    Ok(()) = dashboard.changed() => {
                        let snapshot = dashboard.borrow_and_update().clone();
                        tracing::debug!(total = snapshot.total(), at = %snapshot.taken_at, "Dashboard refreshed");
                    }
                }
            }

            monitor.stop().await;
            servers.disconnect_all().await?;

            let total: u64 = messages.dashboard_counts().values().sum();
            eprintln!("{} message(s) received", total);
        }
    }

    Ok(())
}
