//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A string could not be parsed as a record identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A string could not be parsed as a timestamp.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
