//! Core error types.

use thiserror::Error;

/// A mutation descriptor that cannot be turned into change events.
///
/// These indicate a defect in the caller that built the descriptor and are
/// surfaced synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// Create mutation without the created record.
    #[error("create mutation has no record")]
    MissingRecord,

    /// Update mutation without an update document.
    #[error("update mutation has no update document")]
    MissingUpdate,

    /// Update document that touches no path at all.
    #[error("update document is empty")]
    EmptyUpdate,

    /// Plain key inside an operator update.
    #[error("operator update contains plain key {0:?}; raw updates must be flagged as raw")]
    AmbiguousUpdate(String),

    /// `$`-prefixed key that is not a recognized operator.
    #[error("unknown update operator {0}")]
    UnknownOperator(String),

    /// Operator whose body is not a path-to-value document.
    #[error("operator {0} must map paths to values")]
    MalformedOperator(String),
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Derivation error.
    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),

    /// Emission worker could not be started or has stopped.
    #[error("emission worker error: {0}")]
    Worker(String),
}
