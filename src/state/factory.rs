use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AppError, Result};
use crate::state::{InMemoryRepository, Repository, SledRepository};
use std::sync::Arc;

/// Create a repository based on configuration
pub fn create_repository(config: &StorageConfig) -> Result<Arc<dyn Repository>> {
    match config.backend {
        StorageBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            let repository = SledRepository::new(path)?;
            Ok(Arc::new(repository))
        }

        StorageBackend::Memory => {
            tracing::info!("Initializing in-memory storage backend");
            Ok(create_in_memory_repository())
        }
    }
}

/// Create an in-memory repository (for testing)
pub fn create_in_memory_repository() -> Arc<dyn Repository> {
    Arc::new(InMemoryRepository::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ProviderType;
    use crate::models::NewServer;
    use crate::state::ServerRepository;
    use tempfile::TempDir;

    #[test]
    fn test_sled_requires_path() {
        let config = StorageConfig {
            backend: StorageBackend::Sled,
            path: None,
        };
        let err = create_repository(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_create_sled_repository() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sled,
            path: Some(temp_dir.path().join("db")),
        };

        let repository = create_repository(&config).unwrap();
        repository
            .save_server(NewServer::new("local", "localhost:4222", ProviderType::Nats))
            .await
            .unwrap();
        assert_eq!(repository.get_all_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_memory_repository() {
        let repository = create_repository(&StorageConfig::default()).unwrap();
        assert!(repository.get_all_servers().await.unwrap().is_empty());
    }
}
