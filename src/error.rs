//! Error types for client operations
//!
//! Module-level errors (`ConfigError`, `EngineError`, `TopicError`, `ReassemblyError`) live
//! next to the code that raises them; [`ClientError`] is what the application sees.

use crate::config::ConfigError;
use crate::protocol::TopicError;
use crate::transport::EngineError;
use thiserror::Error;

/// Main error type for `MqttClient` operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The request needs a live connection and is never queued
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
}

impl ClientError {
    /// True for errors a caller may fix by waiting for the connection
    pub fn is_not_connected(&self) -> bool {
        matches!(self, ClientError::NotConnected)
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
