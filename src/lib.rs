//! broker-ui core
//!
//! Messaging backend for a desktop message-broker client. Server, topic and
//! subscription records are persisted through [`state`]; live connections are
//! owned by [`services::ServerService`] and message traffic flows through
//! [`services::MessageService`], both on top of the broker-agnostic
//! [`messaging`] layer.

pub mod config;
pub mod error;
pub mod messaging;
pub mod models;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
