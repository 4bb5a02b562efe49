//! Relay error types.

use thiserror::Error;

/// Relay errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] fieldwatch_proto::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The relay context was shut down.
    #[error("relay context is closed")]
    Closed,
}
