//! Channel routing for derived events.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use fieldwatch_proto::ChangeEvent;

use super::worker::{EmissionWorker, Task};
use crate::config::EmissionMode;
use crate::error::Error;

/// In-process listener callback.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Receives every derived event after the channel listeners ran.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn deliver(&self, event: &ChangeEvent);
}

/// Handle returned by [`EmissionRouter::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener and sink registry shared between a router and its worker.
#[derive(Default)]
pub(crate) struct Registry {
    listeners: DashMap<String, Vec<(ListenerId, Listener)>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add(&self, channel: String, listener: Listener) -> ListenerId {
        let id = self.next_id();
        self.insert(channel, id, listener);
        id
    }

    pub fn insert(&self, channel: String, id: ListenerId, listener: Listener) {
        self.listeners.entry(channel).or_default().push((id, listener));
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(listener_id, _)| *listener_id != id);
            removed |= entry.len() != before;
        }
        self.listeners.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    pub fn count(&self, channel: &str) -> usize {
        self.listeners.get(channel).map(|l| l.len()).unwrap_or(0)
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Deliver one event on every channel of its scope, then to the sinks.
    pub fn deliver(&self, event: &ChangeEvent) {
        for scope in event.scope.delivery_scopes() {
            let channel = event.channel(*scope);
            // Snapshot so listeners may register or remove listeners re-entrantly.
            let listeners: Vec<Listener> = match self.listeners.get(&channel) {
                Some(entry) => entry.iter().map(|(_, l)| l.clone()).collect(),
                None => continue,
            };
            for listener in listeners {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                    tracing::error!(
                        channel = %channel,
                        panic = panic_message(&*panic),
                        "event listener panicked"
                    );
                }
            }
        }

        let sinks = self.sinks.read().clone();
        for sink in sinks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(event))) {
                tracing::error!(
                    event = %event.name,
                    panic = panic_message(&*panic),
                    "event sink panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Routes derived events to in-process listeners and whole-stream sinks.
///
/// Listeners subscribe to a channel name: `doc:<event>` for entity-scoped
/// events, `model:<event>` for entity and collection events, or the bare event
/// name for every event. For each event the channels are visited in that order,
/// then every sink (for example the relay publisher) sees the event.
///
/// In [`EmissionMode::Deferred`] mode the events are handed to a dedicated
/// worker thread named `fieldwatch-emit-<schema>`; in
/// [`EmissionMode::Synchronous`] mode they are delivered before
/// [`emit`](Self::emit) returns.
pub struct EmissionRouter {
    schema: String,
    mode: EmissionMode,
    registry: Arc<Registry>,
    worker: Option<EmissionWorker>,
}

impl EmissionRouter {
    /// Create a router for `schema`.
    pub fn new(schema: impl Into<String>, mode: EmissionMode) -> Result<Self, Error> {
        let schema = schema.into();
        let registry = Arc::new(Registry::default());

        let worker = match mode {
            EmissionMode::Synchronous => None,
            EmissionMode::Deferred => Some(EmissionWorker::start(
                format!("fieldwatch-emit-{}", schema),
                registry.clone(),
            )?),
        };

        Ok(Self {
            schema,
            mode,
            registry,
            worker,
        })
    }

    /// Schema name this router serves.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Delivery mode.
    pub fn mode(&self) -> EmissionMode {
        self.mode
    }

    /// Register a listener on `channel`.
    pub fn on<F>(&self, channel: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.registry.add(channel.clone(), Arc::new(listener));
        tracing::debug!(schema = %self.schema, channel = %channel, "listener registered");
        id
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once<F>(&self, channel: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let fired = AtomicBool::new(false);

        let wrapper = move |event: &ChangeEvent| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
            listener(event);
        };

        self.registry.insert(channel.into(), id, Arc::new(wrapper));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    /// Number of listeners on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.registry.count(channel)
    }

    /// Add a sink that sees every event after the channel listeners.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.registry.add_sink(sink);
    }

    /// Deliver the events of one mutation, in order.
    pub fn emit(&self, events: Vec<ChangeEvent>) -> Result<(), Error> {
        if events.is_empty() {
            return Ok(());
        }
        match &self.worker {
            Some(worker) => worker.submit(Task::Deliver(events)),
            None => {
                for event in &events {
                    self.registry.deliver(event);
                }
                Ok(())
            }
        }
    }

    /// Block until every event emitted so far has been delivered.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`flush_async`](Self::flush_async) there.
    pub fn flush(&self) -> Result<(), Error> {
        match &self.worker {
            Some(worker) => worker
                .barrier()?
                .blocking_recv()
                .map_err(|_| Error::Worker("emission worker exited".to_string())),
            None => Ok(()),
        }
    }

    /// Wait until every event emitted so far has been delivered.
    pub async fn flush_async(&self) -> Result<(), Error> {
        match &self.worker {
            Some(worker) => worker
                .barrier()?
                .await
                .map_err(|_| Error::Worker("emission worker exited".to_string())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EmissionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionRouter")
            .field("schema", &self.schema)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
