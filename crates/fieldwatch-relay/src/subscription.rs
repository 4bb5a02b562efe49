//! Pattern subscription tracking.

use std::sync::Arc;
use std::time::Instant;

use fieldwatch_proto::Document;

/// Metadata passed to relay callbacks alongside the decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The subscribed pattern.
    pub pattern: String,
    /// The concrete channel the message arrived on.
    pub channel: String,
}

/// Relay callback.
pub type Callback = Arc<dyn Fn(&Document, &Delivery) + Send + Sync>;

/// Identifier of one logical listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u64);

/// One transport-level pattern subscription shared by many listeners.
pub struct SubscriptionEntry {
    /// The pattern subscribed at the transport.
    pub pattern: String,
    /// Listeners in registration order.
    listeners: Vec<(SubscriberId, Callback)>,
    /// When the transport subscription was made.
    pub created_at: Instant,
    /// Number of messages dispatched through this entry.
    pub messages_received: u64,
}

impl SubscriptionEntry {
    /// Create an entry with no listeners.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            listeners: Vec::new(),
            created_at: Instant::now(),
            messages_received: 0,
        }
    }

    /// Number of live listeners.
    pub fn refcount(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener remains.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Append a listener.
    pub fn add(&mut self, id: SubscriberId, callback: Callback) {
        self.listeners.push((id, callback));
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Snapshot the callbacks, in registration order.
    pub fn callbacks(&self) -> Vec<Callback> {
        self.listeners.iter().map(|(_, cb)| cb.clone()).collect()
    }

    /// Count one dispatched message.
    pub fn record_message(&mut self) {
        self.messages_received += 1;
    }

    /// Age of the transport subscription.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("pattern", &self.pattern)
            .field("refcount", &self.refcount())
            .field("messages_received", &self.messages_received)
            .finish()
    }
}
