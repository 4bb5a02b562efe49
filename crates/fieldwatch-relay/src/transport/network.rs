//! nng transport through the fieldwatch broker.
//!
//! Publishers push frames to the broker's ingress (PUSH → PULL); the broker
//! republishes every frame on its egress (PUB → SUB). Subscribers register the
//! literal prefix of each pattern as an nng topic, then match the full glob
//! locally before handing the message to the relay. [`NngBroker`] is the
//! forwarder between the two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use nng::options::protocol::pubsub::{Subscribe, Unsubscribe};
use nng::options::{Options, RecvMaxSize, RecvTimeout, SendTimeout};
use nng::{Message, Protocol, Socket};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;

use fieldwatch_proto::framing::{decode_frame, encode_frame, MAX_MESSAGE_SIZE};

use super::{InboundMessage, PublishConnection, SubscribeConnection};
use crate::error::Error;
use crate::pattern::{glob_to_regex, literal_prefix};

/// Default broker ingress address (publishers dial it).
pub const DEFAULT_INGRESS_ADDRESS: &str = "tcp://127.0.0.1:9470";

/// Default broker egress address (subscribers dial it).
pub const DEFAULT_EGRESS_ADDRESS: &str = "tcp://127.0.0.1:9471";

/// Default send and receive timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// nng connection configuration.
#[derive(Debug, Clone)]
pub struct NngConfig {
    /// Address to dial.
    pub address: String,

    /// Send timeout.
    pub send_timeout: Duration,

    /// Receive timeout; also bounds how long the receive thread takes to stop.
    pub recv_timeout: Duration,

    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl NngConfig {
    /// Create a configuration dialing `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            send_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            recv_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Configuration for a publisher dialing the default ingress.
    pub fn ingress() -> Self {
        Self::new(DEFAULT_INGRESS_ADDRESS)
    }

    /// Configuration for a subscriber dialing the default egress.
    pub fn egress() -> Self {
        Self::new(DEFAULT_EGRESS_ADDRESS)
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the receive timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Publish connection pushing frames to the broker ingress.
pub struct NngPublisher {
    socket: Socket,
    config: NngConfig,
}

impl NngPublisher {
    /// Dial the broker ingress.
    ///
    /// Dialing is asynchronous: the broker does not have to be up yet.
    pub fn connect(config: NngConfig) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Push0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<SendTimeout>(Some(config.send_timeout))
            .map_err(|e| Error::Transport(format!("failed to set send timeout: {}", e)))?;

        socket
            .dial_async(&config.address)
            .map_err(|e| Error::Transport(format!("failed to dial {}: {}", config.address, e)))?;

        tracing::debug!(address = %config.address, "publisher connected");
        Ok(Self { socket, config })
    }

    /// Address this publisher dials.
    pub fn address(&self) -> &str {
        &self.config.address
    }
}

impl PublishConnection for NngPublisher {
    fn publish(&self, channel: &str, payload: Bytes) -> Result<(), Error> {
        let frame = encode_frame(channel, &payload)?;
        if frame.len() > self.config.max_message_size {
            return Err(Error::Transport(format!(
                "message too large: {} bytes (max: {})",
                frame.len(),
                self.config.max_message_size
            )));
        }

        self.socket
            .send(Message::from(&frame[..]))
            .map_err(|(_, e)| match e {
                nng::Error::TimedOut => {
                    Error::Transport(format!("publish to {} timed out", channel))
                }
                _ => Error::Transport(format!("failed to publish to {}: {}", channel, e)),
            })
    }
}

/// Patterns held by a subscriber and the nng topics they map to.
#[derive(Default)]
struct TopicTable {
    patterns: Vec<(String, Regex)>,
    /// Topic prefix to number of patterns sharing it.
    prefixes: HashMap<String, usize>,
}

/// Subscribe connection reading from the broker egress.
///
/// A named receive thread forwards matching messages to the receiver returned
/// by [`connect`](Self::connect). Dropping the subscriber stops the thread.
pub struct NngSubscriber {
    socket: Socket,
    topics: Arc<Mutex<TopicTable>>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NngSubscriber {
    /// Dial the broker egress and start the receive thread.
    pub fn connect(
        config: NngConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundMessage>), Error> {
        let socket = Socket::new(Protocol::Sub0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<RecvMaxSize>(config.max_message_size)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<RecvTimeout>(Some(config.recv_timeout))
            .map_err(|e| Error::Transport(format!("failed to set recv timeout: {}", e)))?;

        socket
            .dial_async(&config.address)
            .map_err(|e| Error::Transport(format!("failed to dial {}: {}", config.address, e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let topics = Arc::new(Mutex::new(TopicTable::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let socket = socket.clone();
            let topics = topics.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("fieldwatch-relay-recv".to_string())
                .spawn(move || Self::receive_loop(socket, topics, tx, shutdown))
                .map_err(|e| Error::Transport(format!("failed to spawn receive thread: {}", e)))?
        };

        tracing::debug!(address = %config.address, "subscriber connected");

        let subscriber = Self {
            socket,
            topics,
            shutdown,
            handle: Mutex::new(Some(handle)),
        };
        Ok((subscriber, rx))
    }

    /// Stop the receive thread and wait for it to finish.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Check if the receive thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn receive_loop(
        socket: Socket,
        topics: Arc<Mutex<TopicTable>>,
        tx: mpsc::UnboundedSender<InboundMessage>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let message = match socket.recv() {
                Ok(message) => message,
                Err(nng::Error::TimedOut) => continue,
                Err(nng::Error::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "receive error");
                    continue;
                }
            };

            let (channel, payload) = match decode_frame(message.as_slice()) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed frame");
                    continue;
                }
            };

            let matched: Vec<String> = topics
                .lock()
                .patterns
                .iter()
                .filter(|(_, regex)| regex.is_match(channel))
                .map(|(pattern, _)| pattern.clone())
                .collect();
            if matched.is_empty() {
                continue;
            }

            let payload = Bytes::copy_from_slice(payload);
            for pattern in matched {
                let inbound = InboundMessage {
                    pattern,
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if tx.send(inbound).is_err() {
                    tracing::debug!("inbound receiver dropped, receive thread stopping");
                    return;
                }
            }
        }
        tracing::debug!("receive thread stopped");
    }
}

impl SubscribeConnection for NngSubscriber {
    fn psubscribe(&self, pattern: &str) -> Result<(), Error> {
        let regex = glob_to_regex(pattern)?;
        let mut topics = self.topics.lock();
        if topics.patterns.iter().any(|(p, _)| p == pattern) {
            return Ok(());
        }

        let prefix = literal_prefix(pattern).to_string();
        if !topics.prefixes.contains_key(&prefix) {
            self.socket
                .set_opt::<Subscribe>(prefix.as_bytes().to_vec())
                .map_err(|e| Error::Transport(format!("failed to subscribe to {:?}: {}", prefix, e)))?;
        }
        *topics.prefixes.entry(prefix).or_insert(0) += 1;
        topics.patterns.push((pattern.to_string(), regex));
        Ok(())
    }

    fn punsubscribe(&self, pattern: &str) -> Result<(), Error> {
        let mut topics = self.topics.lock();
        let Some(index) = topics.patterns.iter().position(|(p, _)| p == pattern) else {
            return Ok(());
        };
        topics.patterns.remove(index);

        let prefix = literal_prefix(pattern).to_string();
        let remaining = match topics.prefixes.get_mut(&prefix) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            topics.prefixes.remove(&prefix);
            self.socket
                .set_opt::<Unsubscribe>(prefix.as_bytes().to_vec())
                .map_err(|e| {
                    Error::Transport(format!("failed to unsubscribe from {:?}: {}", prefix, e))
                })?;
        }
        Ok(())
    }
}

impl Drop for NngSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forwarding broker: frames pushed to the ingress are republished on the egress.
///
/// The forwarding loop runs on a named thread started by
/// [`start`](Self::start); [`stop`](Self::stop) ends it within one receive
/// timeout.
pub struct NngBroker {
    ingress: Socket,
    egress: Socket,
    recv_timeout: Duration,
    forwarded: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NngBroker {
    /// Listen on both addresses.
    pub fn bind(ingress: &NngConfig, egress: &NngConfig) -> Result<Self, Error> {
        let pull = Socket::new(Protocol::Pull0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;
        pull.set_opt::<RecvMaxSize>(ingress.max_message_size)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;
        pull.set_opt::<RecvTimeout>(Some(ingress.recv_timeout))
            .map_err(|e| Error::Transport(format!("failed to set recv timeout: {}", e)))?;
        pull.listen(&ingress.address).map_err(|e| {
            Error::Transport(format!("failed to listen on {}: {}", ingress.address, e))
        })?;
        tracing::info!(address = %ingress.address, "ingress listening");

        let publish = Socket::new(Protocol::Pub0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;
        publish
            .set_opt::<SendTimeout>(Some(egress.send_timeout))
            .map_err(|e| Error::Transport(format!("failed to set send timeout: {}", e)))?;
        publish.listen(&egress.address).map_err(|e| {
            Error::Transport(format!("failed to listen on {}: {}", egress.address, e))
        })?;
        tracing::info!(address = %egress.address, "egress listening");

        Ok(Self {
            ingress: pull,
            egress: publish,
            recv_timeout: ingress.recv_timeout,
            forwarded: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Start the forwarding thread. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), Error> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let ingress = self.ingress.clone();
        let egress = self.egress.clone();
        let forwarded = self.forwarded.clone();
        let shutdown = self.shutdown.clone();
        let spawned = thread::Builder::new()
            .name("fieldwatch-broker".to_string())
            .spawn(move || Self::forward_loop(ingress, egress, forwarded, shutdown))
            .map_err(|e| Error::Transport(format!("failed to spawn broker thread: {}", e)))?;

        *handle = Some(spawned);
        Ok(())
    }

    /// Stop forwarding and wait for the thread to finish.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            tracing::info!(forwarded = self.forwarded(), "broker stopped");
        }
    }

    /// Number of frames forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Receive timeout of the ingress socket.
    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    fn forward_loop(
        ingress: Socket,
        egress: Socket,
        forwarded: Arc<AtomicU64>,
        shutdown: Arc<AtomicBool>,
    ) {
        while !shutdown.load(Ordering::SeqCst) {
            let message = match ingress.recv() {
                Ok(message) => message,
                Err(nng::Error::TimedOut) => continue,
                Err(nng::Error::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "ingress receive error");
                    continue;
                }
            };

            if let Ok((channel, _)) = decode_frame(message.as_slice()) {
                tracing::trace!(channel, bytes = message.len(), "forwarding frame");
            } else {
                tracing::warn!(bytes = message.len(), "dropping malformed frame");
                continue;
            }

            if let Err((_, e)) = egress.send(message) {
                tracing::error!(error = %e, "egress send error");
                continue;
            }
            forwarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for NngBroker {
    fn drop(&mut self) {
        self.stop();
    }
}
