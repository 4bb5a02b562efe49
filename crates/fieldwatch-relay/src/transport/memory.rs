//! In-process broker.
//!
//! Behaves like a pattern pub/sub server: every subscriber connection receives
//! one message per matching pattern it holds. Subscribing twice to the same
//! pattern on one connection is a no-op, as is unsubscribing an unknown one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use regex::Regex;
use tokio::sync::mpsc;

use super::{InboundMessage, PublishConnection, SubscribeConnection};
use crate::error::Error;
use crate::pattern::glob_to_regex;

/// Per-connection subscription state.
struct SubscriberState {
    patterns: Vec<(String, Regex)>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: DashMap<u64, SubscriberState>,
    next_id: AtomicU64,
    published: AtomicU64,
    subscribe_calls: AtomicU64,
    unsubscribe_calls: AtomicU64,
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a publish connection.
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            state: self.state.clone(),
        }
    }

    /// Open a subscribe connection and the receiver its messages arrive on.
    pub fn subscriber(&self) -> (MemorySubscriber, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.subscribers.insert(
            id,
            SubscriberState {
                patterns: Vec::new(),
                tx,
            },
        );

        let subscriber = MemorySubscriber {
            id,
            state: self.state.clone(),
        };
        (subscriber, rx)
    }

    /// Number of messages published so far.
    pub fn published(&self) -> u64 {
        self.state.published.load(Ordering::Relaxed)
    }

    /// Number of pattern subscribe calls received so far.
    pub fn subscribe_calls(&self) -> u64 {
        self.state.subscribe_calls.load(Ordering::Relaxed)
    }

    /// Number of pattern unsubscribe calls received so far.
    pub fn unsubscribe_calls(&self) -> u64 {
        self.state.unsubscribe_calls.load(Ordering::Relaxed)
    }

    /// Number of patterns held across all connections.
    pub fn pattern_count(&self) -> usize {
        self.state
            .subscribers
            .iter()
            .map(|subscriber| subscriber.patterns.len())
            .sum()
    }
}

/// Publish side of a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryPublisher {
    state: Arc<BrokerState>,
}

impl PublishConnection for MemoryPublisher {
    fn publish(&self, channel: &str, payload: Bytes) -> Result<(), Error> {
        self.state.published.fetch_add(1, Ordering::Relaxed);

        for subscriber in self.state.subscribers.iter() {
            for (pattern, regex) in &subscriber.patterns {
                if !regex.is_match(channel) {
                    continue;
                }
                let message = InboundMessage {
                    pattern: pattern.clone(),
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if subscriber.tx.send(message).is_err() {
                    tracing::trace!(channel, "subscriber receiver dropped");
                }
            }
        }
        Ok(())
    }
}

/// Subscribe side of a [`MemoryBroker`]. Dropping it closes the connection.
pub struct MemorySubscriber {
    id: u64,
    state: Arc<BrokerState>,
}

impl MemorySubscriber {
    /// Patterns currently held by this connection.
    pub fn patterns(&self) -> Vec<String> {
        self.state
            .subscribers
            .get(&self.id)
            .map(|s| s.patterns.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }
}

impl SubscribeConnection for MemorySubscriber {
    fn psubscribe(&self, pattern: &str) -> Result<(), Error> {
        let regex = glob_to_regex(pattern)?;
        let mut subscriber = self
            .state
            .subscribers
            .get_mut(&self.id)
            .ok_or_else(|| Error::Transport("subscriber connection closed".to_string()))?;

        self.state.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        if !subscriber.patterns.iter().any(|(p, _)| p == pattern) {
            subscriber.patterns.push((pattern.to_string(), regex));
        }
        Ok(())
    }

    fn punsubscribe(&self, pattern: &str) -> Result<(), Error> {
        let mut subscriber = self
            .state
            .subscribers
            .get_mut(&self.id)
            .ok_or_else(|| Error::Transport("subscriber connection closed".to_string()))?;

        self.state.unsubscribe_calls.fetch_add(1, Ordering::Relaxed);
        subscriber.patterns.retain(|(p, _)| p != pattern);
        Ok(())
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.state.subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_delivery() {
        let broker = MemoryBroker::new();
        let (subscriber, mut rx) = broker.subscriber();
        subscriber.psubscribe("Post.*").unwrap();
        subscriber.psubscribe("*.created").unwrap();

        let publisher = broker.publisher();
        publisher.publish("Post.created", Bytes::from_static(b"{}")).unwrap();
        publisher.publish("Comment.removed", Bytes::from_static(b"{}")).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.pattern, "Post.*");
        assert_eq!(second.pattern, "*.created");
        assert_eq!(first.channel, "Post.created");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.published(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let (subscriber, mut rx) = broker.subscriber();
        subscriber.psubscribe("Post.*").unwrap();
        subscriber.psubscribe("Post.*").unwrap();
        assert_eq!(subscriber.patterns(), vec!["Post.*"]);

        subscriber.punsubscribe("Post.*").unwrap();
        broker
            .publisher()
            .publish("Post.created", Bytes::from_static(b"{}"))
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(broker.subscribe_calls(), 2);
        assert_eq!(broker.unsubscribe_calls(), 1);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let broker = MemoryBroker::new();
        let (subscriber, _rx) = broker.subscriber();
        subscriber.psubscribe("*").unwrap();
        assert_eq!(broker.pattern_count(), 1);

        drop(subscriber);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn test_invalid_pattern() {
        let broker = MemoryBroker::new();
        let (subscriber, _rx) = broker.subscriber();
        assert!(matches!(subscriber.psubscribe("a[b"), Err(Error::Config(_))));
    }
}
