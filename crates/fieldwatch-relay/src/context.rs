//! Relay subscription multiplexer.
//!
//! A [`RelayContext`] owns a dedicated subscribe connection and the registry of
//! logical listeners. Listeners on the same pattern share one transport
//! subscription: the first listener subscribes, the last one to go
//! unsubscribes. Inbound messages are decoded once per pattern and handed to
//! every listener of that pattern in registration order.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fieldwatch_proto::{Codec, Document};

use crate::config::RelayConfig;
use crate::error::Error;
use crate::relay_log;
use crate::subscription::{Callback, Delivery, SubscriberId, SubscriptionEntry};
use crate::transport::{InboundMessage, SubscribeConnection};

struct ContextInner {
    connection: Box<dyn SubscribeConnection>,
    /// Pattern to shared subscription. Transport calls happen under this lock.
    registry: Mutex<HashMap<String, SubscriptionEntry>>,
    next_id: AtomicU64,
    config: RelayConfig,
    codec: Codec,
    closed: AtomicBool,
}

impl ContextInner {
    /// Remove one listener, unsubscribing the pattern when it was the last.
    fn remove_listener(&self, pattern: &str, id: SubscriberId) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.get_mut(pattern) else {
            return;
        };
        if !entry.remove(id) || !entry.is_empty() {
            return;
        }

        registry.remove(pattern);
        match self.connection.punsubscribe(pattern) {
            Ok(()) => relay_log!(self.config.verbosity, pattern, "pattern unsubscribed"),
            Err(e) => tracing::error!(pattern, error = %e, "failed to unsubscribe pattern"),
        }
    }
}

/// Shared pattern subscriptions over one subscribe connection.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct RelayContext {
    inner: Arc<ContextInner>,
}

impl RelayContext {
    /// Create a context over a dedicated subscribe connection.
    pub fn new(connection: impl SubscribeConnection + 'static, config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                connection: Box::new(connection),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                codec: config.codec(),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Register `callback` for messages on channels matching `pattern`.
    ///
    /// The transport subscription is made when the first listener of a pattern
    /// registers. If it fails the error is returned and nothing is registered.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, callback: F) -> Result<Disposer, Error>
    where
        F: Fn(&Document, &Delivery) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.register(pattern.into(), id, Arc::new(callback))
    }

    /// Register `callback` for the first matching message only.
    pub fn subscribe_once<F>(&self, pattern: impl Into<String>, callback: F) -> Result<Disposer, Error>
    where
        F: Fn(&Document, &Delivery) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let context = Arc::downgrade(&self.inner);
        let fired = AtomicBool::new(false);
        let own_pattern = pattern.clone();

        let wrapper = move |payload: &Document, delivery: &Delivery| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(context) = context.upgrade() {
                context.remove_listener(&own_pattern, id);
            }
            callback(payload, delivery);
        };

        self.register(pattern, id, Arc::new(wrapper))
    }

    fn register(&self, pattern: String, id: SubscriberId, callback: Callback) -> Result<Disposer, Error> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let mut registry = self.inner.registry.lock();
        if !registry.contains_key(&pattern) {
            self.inner.connection.psubscribe(&pattern)?;
            relay_log!(self.inner.config.verbosity, pattern = %pattern, "pattern subscribed");
            registry.insert(pattern.clone(), SubscriptionEntry::new(pattern.clone()));
        }
        if let Some(entry) = registry.get_mut(&pattern) {
            entry.add(id, callback);
        }

        Ok(Disposer {
            context: Arc::downgrade(&self.inner),
            pattern,
            id,
            disposed: AtomicBool::new(false),
        })
    }

    /// Listener count of `pattern`.
    pub fn refcount(&self, pattern: &str) -> usize {
        self.inner
            .registry
            .lock()
            .get(pattern)
            .map(SubscriptionEntry::refcount)
            .unwrap_or(0)
    }

    /// Messages delivered through `pattern` since it was subscribed.
    pub fn messages_received(&self, pattern: &str) -> u64 {
        self.inner
            .registry
            .lock()
            .get(pattern)
            .map(|entry| entry.messages_received)
            .unwrap_or(0)
    }

    /// Patterns with a live transport subscription.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.inner.registry.lock().keys().cloned().collect();
        patterns.sort();
        patterns
    }

    /// Deliver one inbound message to the listeners of its pattern.
    ///
    /// Returns the number of callbacks invoked. Undecodable payloads are logged
    /// and dropped.
    pub fn dispatch(&self, message: InboundMessage) -> usize {
        if !self.inner.registry.lock().contains_key(&message.pattern) {
            return 0;
        }

        let payload = match self.inner.codec.decode(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    pattern = %message.pattern,
                    channel = %message.channel,
                    error = %e,
                    "failed to decode relayed payload, dropping"
                );
                return 0;
            }
        };

        let callbacks = {
            let mut registry = self.inner.registry.lock();
            match registry.get_mut(&message.pattern) {
                Some(entry) => {
                    entry.record_message();
                    entry.callbacks()
                }
                // Unsubscribed while decoding.
                None => return 0,
            }
        };

        let delivery = Delivery {
            pattern: message.pattern,
            channel: message.channel,
        };
        for callback in &callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&payload, &delivery))).is_err() {
                tracing::error!(
                    pattern = %delivery.pattern,
                    channel = %delivery.channel,
                    "relay callback panicked"
                );
            }
        }
        callbacks.len()
    }

    /// Dispatch inbound messages until the receiver closes.
    pub async fn run_inbound(&self, mut rx: mpsc::UnboundedReceiver<InboundMessage>) {
        relay_log!(self.inner.config.verbosity, "relay inbound loop started");

        while let Some(message) = rx.recv().await {
            self.dispatch(message);
        }

        relay_log!(self.inner.config.verbosity, "relay inbound loop stopped (channel closed)");
    }

    /// Spawn the inbound loop on the current tokio runtime.
    ///
    /// The task only holds a weak handle: it ends once the receiver closes or
    /// every handle to this context is dropped.
    pub fn spawn_inbound(&self, mut rx: mpsc::UnboundedReceiver<InboundMessage>) -> JoinHandle<()> {
        let context = Arc::downgrade(&self.inner);
        let verbosity = self.inner.config.verbosity;

        tokio::spawn(async move {
            relay_log!(verbosity, "relay inbound task started");
            while let Some(message) = rx.recv().await {
                let Some(inner) = context.upgrade() else {
                    break;
                };
                RelayContext { inner }.dispatch(message);
            }
            relay_log!(verbosity, "relay inbound task stopped");
        })
    }

    /// Convenience handle for the channels of one schema.
    pub fn schema(&self, schema: impl Into<String>) -> SchemaRelay<'_> {
        SchemaRelay {
            context: self,
            schema: schema.into(),
        }
    }

    /// Unsubscribe every pattern and refuse new subscriptions.
    ///
    /// Returns the first transport error, after attempting every pattern.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.inner.closed.store(true, Ordering::SeqCst);

        let mut registry = self.inner.registry.lock();
        let mut first_error = None;
        for (pattern, entry) in registry.drain() {
            match self.inner.connection.punsubscribe(&pattern) {
                Ok(()) => relay_log!(
                    self.inner.config.verbosity,
                    pattern = %pattern,
                    listeners = entry.refcount(),
                    "pattern unsubscribed on shutdown"
                ),
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "failed to unsubscribe pattern");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check if the context was shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("patterns", &self.patterns())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Removes one listener registered through [`RelayContext::subscribe`].
///
/// Disposing twice is a no-op. Dropping a disposer does not remove the
/// listener.
#[derive(Debug)]
pub struct Disposer {
    context: Weak<ContextInner>,
    pattern: String,
    id: SubscriberId,
    disposed: AtomicBool,
}

impl Disposer {
    /// Remove the listener.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(context) = self.context.upgrade() {
            context.remove_listener(&self.pattern, self.id);
        }
    }

    /// Check if [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// The pattern this listener was registered on.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Schema-scoped view of a [`RelayContext`].
///
/// Patterns are prefixed with `<schema>.`, so `on("updated:*", ..)` listens on
/// every field event of the schema.
#[derive(Debug)]
pub struct SchemaRelay<'a> {
    context: &'a RelayContext,
    schema: String,
}

impl SchemaRelay<'_> {
    /// Full pattern for an event pattern of this schema.
    pub fn pattern(&self, event: &str) -> String {
        format!("{}.{}", self.schema, event)
    }

    /// Listen on events of this schema matching `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<Disposer, Error>
    where
        F: Fn(&Document, &Delivery) + Send + Sync + 'static,
    {
        self.context.subscribe(self.pattern(event), callback)
    }

    /// Listen on the first event of this schema matching `event`.
    pub fn once<F>(&self, event: &str, callback: F) -> Result<Disposer, Error>
    where
        F: Fn(&Document, &Delivery) + Send + Sync + 'static,
    {
        self.context.subscribe_once(self.pattern(event), callback)
    }
}
