//! Broker transports.
//!
//! The relay needs two kinds of connection: one that publishes to a channel and
//! one that holds pattern subscriptions. A subscribe connection is dedicated to
//! subscribing and hands matching messages to an unbounded channel drained by
//! the [`RelayContext`](crate::RelayContext).
//!
//! - [`memory`] - In-process broker
//! - [`network`] - nng transport through the fieldwatch broker

pub mod memory;
pub mod network;

use bytes::Bytes;

use crate::error::Error;

/// A message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The subscribed pattern that matched.
    pub pattern: String,
    /// The concrete channel the message was published on.
    pub channel: String,
    /// Encoded payload.
    pub payload: Bytes,
}

/// Connection used to publish messages.
pub trait PublishConnection: Send + Sync {
    /// Publish `payload` on `channel`.
    fn publish(&self, channel: &str, payload: Bytes) -> Result<(), Error>;
}

/// Connection dedicated to pattern subscriptions.
pub trait SubscribeConnection: Send + Sync {
    /// Start receiving messages on channels matching `pattern`.
    fn psubscribe(&self, pattern: &str) -> Result<(), Error>;

    /// Stop receiving messages for `pattern`.
    fn punsubscribe(&self, pattern: &str) -> Result<(), Error>;
}
