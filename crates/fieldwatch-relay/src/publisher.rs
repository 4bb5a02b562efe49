//! Relay publisher: forwards allowed change events to the broker.

use std::sync::Arc;

use fieldwatch_core::EventSink;
use fieldwatch_proto::{ChangeEvent, Codec};

use crate::config::RelayConfig;
use crate::error::Error;
use crate::relay_log;
use crate::transport::PublishConnection;

/// Publishes change events on `<schema>.<event>` channels.
///
/// Registered as a sink on a feed's router, it sees every derived event after
/// the in-process listeners ran. Events missing from the allow-list are
/// skipped; encode and transport failures are logged and the event dropped.
pub struct RelayPublisher {
    schema: String,
    connection: Arc<dyn PublishConnection>,
    config: RelayConfig,
    codec: Codec,
}

impl RelayPublisher {
    /// Create a publisher for `schema`.
    pub fn new(
        schema: impl Into<String>,
        connection: Arc<dyn PublishConnection>,
        config: RelayConfig,
    ) -> Self {
        Self {
            schema: schema.into(),
            codec: config.codec(),
            connection,
            config,
        }
    }

    /// Schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Relay channel for an event name.
    pub fn channel_for(&self, event: &str) -> String {
        format!("{}.{}", self.schema, event)
    }

    /// Publish one event. Returns `false` if the allow-list filtered it out.
    pub fn publish(&self, event: &ChangeEvent) -> Result<bool, Error> {
        if !self.config.allows(&event.name) {
            tracing::trace!(schema = %self.schema, event = %event.name, "event not relayed");
            return Ok(false);
        }

        let channel = self.channel_for(&event.name);
        let payload = self.codec.encode(&event.payload)?;
        let size = payload.len();
        self.connection.publish(&channel, payload)?;

        relay_log!(self.config.verbosity, channel = %channel, bytes = size, "event published");
        Ok(true)
    }
}

impl EventSink for RelayPublisher {
    fn deliver(&self, event: &ChangeEvent) {
        match self.publish(event) {
            Ok(_) => {}
            Err(Error::Protocol(e)) => {
                tracing::warn!(
                    schema = %self.schema,
                    event = %event.name,
                    error = %e,
                    "failed to encode event, dropping"
                );
            }
            Err(e) => {
                tracing::error!(
                    schema = %self.schema,
                    event = %event.name,
                    error = %e,
                    "failed to publish event, dropping"
                );
            }
        }
    }
}

impl std::fmt::Debug for RelayPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPublisher")
            .field("schema", &self.schema)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
