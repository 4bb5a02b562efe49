//! fieldwatch protocol types and serialization.
//!
//! This crate defines the data shared by the derivation engine and the relay:
//!
//! - [`value`] - Runtime values, documents, identifiers and timestamps
//! - [`mutation`] - Mutation descriptors and update operators
//! - [`event`] - Change events and delivery scopes
//! - [`codec`] - Standard and extended JSON wire codec
//! - [`framing`] - Channel framing for the network transport
//! - [`error`] - Protocol error types

pub mod codec;
pub mod error;
pub mod event;
pub mod framing;
pub mod mutation;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use codec::Codec;
pub use event::{ChangeEvent, Scope};
pub use mutation::{MutationDescriptor, MutationKind, Operator, UpdateBuilder, UpdateDocument};
pub use value::{Document, Identifier, Timestamp, Value};
