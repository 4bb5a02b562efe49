//! Broker error types.

use thiserror::Error;

/// Broker errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Relay or transport error.
    #[error("relay error: {0}")]
    Relay(#[from] fieldwatch_relay::Error),

    /// Payload encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] fieldwatch_proto::Error),

    /// Background task failed.
    #[error("task error: {0}")]
    Task(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
