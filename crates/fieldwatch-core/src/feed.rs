//! Per-schema change feed.

use std::sync::Arc;

use fieldwatch_proto::{ChangeEvent, Document, MutationDescriptor};

use crate::config::EventsConfig;
use crate::derive::EventDeriver;
use crate::emit::{EmissionRouter, EventSink, ListenerId};
use crate::error::Error;

/// Derives and emits the change events of one schema.
///
/// The persistence layer calls [`apply`](Self::apply) once per mutation, after
/// the mutation succeeded. Derivation errors are returned to the caller; the
/// events themselves reach listeners through the [`EmissionRouter`].
#[derive(Debug)]
pub struct ChangeFeed {
    config: EventsConfig,
    deriver: EventDeriver,
    router: EmissionRouter,
}

impl ChangeFeed {
    /// Create a feed for `schema`.
    pub fn new(schema: impl Into<String>, config: EventsConfig) -> Result<Self, Error> {
        let router = EmissionRouter::new(schema, config.emission_mode)?;
        Ok(Self {
            deriver: EventDeriver::new(&config),
            config,
            router,
        })
    }

    /// Schema name.
    pub fn schema(&self) -> &str {
        self.router.schema()
    }

    /// Feed configuration.
    pub fn config(&self) -> &EventsConfig {
        &self.config
    }

    /// The underlying router.
    pub fn router(&self) -> &EmissionRouter {
        &self.router
    }

    /// Register a listener on `channel`.
    pub fn on<F>(&self, channel: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.router.on(channel, listener)
    }

    /// Register a listener removed after its first invocation.
    pub fn once<F>(&self, channel: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.router.once(channel, listener)
    }

    /// Remove a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.router.off(id)
    }

    /// Add a whole-stream sink, such as a relay publisher.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.router.add_sink(sink);
    }

    /// Derive and emit the events of one mutation.
    ///
    /// Returns the number of events emitted.
    pub fn apply(&self, descriptor: MutationDescriptor) -> Result<usize, Error> {
        let kind = descriptor.kind;
        let events = self.deriver.derive(descriptor)?;
        let count = events.len();

        tracing::trace!(
            schema = %self.schema(),
            kind = ?kind,
            events = count,
            "mutation derived"
        );

        self.router.emit(events)?;
        Ok(count)
    }

    /// Derive and emit the events of an imperative save of `record`.
    pub fn save<S: AsRef<str>>(&self, record: &Document, modified_paths: &[S]) -> Result<usize, Error> {
        self.apply(MutationDescriptor::from_save(record, modified_paths))
    }

    /// Block until every emitted event has been delivered.
    pub fn flush(&self) -> Result<(), Error> {
        self.router.flush()
    }

    /// Wait until every emitted event has been delivered.
    pub async fn flush_async(&self) -> Result<(), Error> {
        self.router.flush_async().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmissionMode;
    use crate::error::DerivationError;
    use fieldwatch_proto::{Identifier, UpdateDocument, Value};
    use parking_lot::Mutex;

    fn feed() -> ChangeFeed {
        ChangeFeed::new(
            "Post",
            EventsConfig::new().with_emission_mode(EmissionMode::Synchronous),
        )
        .unwrap()
    }

    fn filter() -> Document {
        let mut filter = Document::new();
        filter.insert("_id".into(), Value::Identifier(Identifier::from_bytes([3; 16])));
        filter
    }

    #[test]
    fn test_apply_emits_derived_events() {
        let feed = feed();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        feed.on("doc:updated:content", move |e: &ChangeEvent| {
            sink.lock().push(e.payload.clone())
        });

        let update = UpdateDocument::builder().set("content.k", 2).build();
        let count = feed.apply(MutationDescriptor::update(filter(), update)).unwrap();

        assert_eq!(count, 3);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(feed.schema(), "Post");
    }

    #[test]
    fn test_apply_surfaces_derivation_error() {
        let feed = feed();
        let err = feed
            .apply(MutationDescriptor::operator_update(filter(), Document::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Derivation(DerivationError::EmptyUpdate)));
    }

    #[test]
    fn test_save() {
        let feed = feed();
        let mut record = filter();
        record.insert("name".into(), "A".into());

        assert_eq!(feed.save(&record, &["name"]).unwrap(), 2);
        assert_eq!(feed.save(&record, &["updatedAt"]).unwrap(), 0);
    }
}
