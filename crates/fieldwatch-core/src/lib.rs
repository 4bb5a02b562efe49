//! fieldwatch core - change event derivation and emission.
//!
//! This crate turns mutation descriptors into fine-grained change events and
//! delivers them to in-process listeners:
//!
//! - [`derive`] - Event derivation from mutation descriptors
//! - [`ancestor`] - Merged updates for ancestor paths
//! - [`path`] - Dotted path helpers
//! - [`emit`] - Channel routing with synchronous or deferred delivery
//! - [`feed`] - Per-schema facade tying derivation and emission together
//! - [`config`] - Feed configuration

pub mod ancestor;
pub mod config;
pub mod derive;
pub mod emit;
pub mod error;
pub mod feed;
pub mod path;

pub use config::{EmissionMode, EventsConfig, DEFAULT_IGNORED_PATHS};
pub use derive::EventDeriver;
pub use emit::{EmissionRouter, EventSink, Listener, ListenerId};
pub use error::{DerivationError, Error};
pub use feed::ChangeFeed;

/// Re-export protocol types.
pub use fieldwatch_proto as proto;
