//! Connection registry, message orchestration and dashboard refresh

pub mod dashboard;
pub mod message_service;
pub mod server_service;

pub use dashboard::{DashboardMonitor, DashboardSnapshot};
pub use message_service::MessageService;
pub use server_service::ServerService;
