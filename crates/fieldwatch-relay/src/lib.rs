//! fieldwatch relay - cross-process propagation of change events.
//!
//! - [`publisher`] - Publishes allowed events from a feed to the broker
//! - [`context`] - Shares pattern subscriptions among many listeners
//! - [`transport`] - Publish and subscribe connections (in-memory and nng)
//! - [`pattern`] - Glob patterns and the relay allow-list
//! - [`config`] - Relay configuration

pub mod config;
pub mod context;
pub mod error;
pub mod pattern;
pub mod publisher;
pub mod subscription;
pub mod transport;

pub use config::RelayConfig;
pub use context::{Disposer, RelayContext, SchemaRelay};
pub use error::Error;
pub use pattern::RelayFilter;
pub use publisher::RelayPublisher;
pub use subscription::{Callback, Delivery, SubscriptionEntry};
pub use transport::memory::MemoryBroker;
pub use transport::network::{NngBroker, NngConfig, NngPublisher, NngSubscriber};
pub use transport::{InboundMessage, PublishConnection, SubscribeConnection};
