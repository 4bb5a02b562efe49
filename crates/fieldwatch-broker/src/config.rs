//! Broker configuration.

use std::time::Duration;

use clap::{Parser, Subcommand};
use fieldwatch_relay::transport::network::{
    DEFAULT_EGRESS_ADDRESS, DEFAULT_INGRESS_ADDRESS, DEFAULT_TIMEOUT_MS,
};
use fieldwatch_relay::{NngConfig, RelayConfig};

/// Default maximum message size in megabytes.
pub const DEFAULT_MAX_MESSAGE_MB: usize = 4;

/// Forwarder configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address publishers push to.
    pub ingress: NngConfig,

    /// Address subscribers dial.
    pub egress: NngConfig,
}

impl BrokerConfig {
    /// Create a configuration listening on the given addresses.
    pub fn new(ingress: impl Into<String>, egress: impl Into<String>) -> Self {
        Self {
            ingress: NngConfig::new(ingress),
            egress: NngConfig::new(egress),
        }
    }

    /// Set the ingress address.
    pub fn with_ingress_address(mut self, address: impl Into<String>) -> Self {
        self.ingress.address = address.into();
        self
    }

    /// Set the egress address.
    pub fn with_egress_address(mut self, address: impl Into<String>) -> Self {
        self.egress.address = address.into();
        self
    }

    /// Set the socket timeout used on both sides.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ingress = self
            .ingress
            .with_send_timeout(timeout)
            .with_recv_timeout(timeout);
        self.egress = self
            .egress
            .with_send_timeout(timeout)
            .with_recv_timeout(timeout);
        self
    }

    /// Set the maximum accepted frame size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.ingress = self.ingress.with_max_message_size(size);
        self.egress = self.egress.with_max_message_size(size);
        self
    }

    /// Check that the two sides do not share an address.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingress.address == self.egress.address {
            return Err(format!(
                "ingress and egress share address {}",
                self.ingress.address
            ));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INGRESS_ADDRESS, DEFAULT_EGRESS_ADDRESS)
    }
}

/// Diagnostic subscriber configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Broker egress connection.
    pub egress: NngConfig,

    /// Channel pattern to subscribe to.
    pub pattern: String,

    /// Relay settings (payload encoding).
    pub relay: RelayConfig,
}

/// One-shot publish configuration.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Broker ingress connection.
    pub ingress: NngConfig,

    /// Channel to publish on.
    pub channel: String,

    /// JSON payload document.
    pub payload: String,

    /// Relay settings (payload encoding).
    pub relay: RelayConfig,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "fieldwatch-broker")]
#[command(version, about = "fieldwatch change event broker", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Forward published events to every subscriber.
    Broker(BrokerArgs),

    /// Print events matching a pattern.
    Watch(WatchArgs),

    /// Publish one payload on a channel.
    Publish(PublishArgs),
}

/// Arguments for `broker`.
#[derive(clap::Args, Debug)]
pub struct BrokerArgs {
    /// Address publishers push to.
    #[arg(long, default_value = DEFAULT_INGRESS_ADDRESS)]
    pub ingress: String,

    /// Address subscribers dial.
    #[arg(long, default_value = DEFAULT_EGRESS_ADDRESS)]
    pub egress: String,

    /// Socket timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Maximum message size in megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_MB)]
    pub max_message_mb: usize,
}

impl BrokerArgs {
    /// Convert command-line arguments to broker configuration.
    pub fn into_config(self) -> BrokerConfig {
        BrokerConfig::new(self.ingress, self.egress)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_message_size(self.max_message_mb * 1024 * 1024)
    }
}

/// Arguments for `watch`.
#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Channel pattern, e.g. `BlogPost.updated:*`.
    #[arg(default_value = "*")]
    pub pattern: String,

    /// Broker egress address.
    #[arg(long, default_value = DEFAULT_EGRESS_ADDRESS)]
    pub egress: String,

    /// Decode payloads as extended JSON.
    #[arg(long)]
    pub extended: bool,
}

impl WatchArgs {
    /// Convert command-line arguments to watch configuration.
    pub fn into_config(self) -> WatchConfig {
        WatchConfig {
            egress: NngConfig::new(self.egress),
            pattern: self.pattern,
            relay: RelayConfig::new().with_extended_json(self.extended),
        }
    }
}

/// Arguments for `publish`.
#[derive(clap::Args, Debug)]
pub struct PublishArgs {
    /// Channel, e.g. `BlogPost.created`.
    pub channel: String,

    /// JSON object payload.
    pub payload: String,

    /// Broker ingress address.
    #[arg(long, default_value = DEFAULT_INGRESS_ADDRESS)]
    pub ingress: String,

    /// Payload is extended JSON.
    #[arg(long)]
    pub extended: bool,
}

impl PublishArgs {
    /// Convert command-line arguments to publish configuration.
    pub fn into_config(self) -> PublishConfig {
        PublishConfig {
            ingress: NngConfig::new(self.ingress),
            channel: self.channel,
            payload: self.payload,
            relay: RelayConfig::new().with_extended_json(self.extended),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.ingress.address, DEFAULT_INGRESS_ADDRESS);
        assert_eq!(config.egress.address, DEFAULT_EGRESS_ADDRESS);
        assert_eq!(
            config.ingress.recv_timeout,
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BrokerConfig::default()
            .with_ingress_address("ipc:///tmp/fw-in.ipc")
            .with_egress_address("ipc:///tmp/fw-out.ipc")
            .with_timeout(Duration::from_millis(250))
            .with_max_message_size(1024);

        assert_eq!(config.ingress.address, "ipc:///tmp/fw-in.ipc");
        assert_eq!(config.egress.address, "ipc:///tmp/fw-out.ipc");
        assert_eq!(config.egress.send_timeout, Duration::from_millis(250));
        assert_eq!(config.ingress.max_message_size, 1024);
    }

    #[test]
    fn test_shared_address_rejected() {
        let config = BrokerConfig::new("tcp://127.0.0.1:1", "tcp://127.0.0.1:1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broker_args() {
        let args = Args::parse_from([
            "fieldwatch-broker",
            "broker",
            "--ingress",
            "tcp://0.0.0.0:7000",
            "--timeout-ms",
            "200",
            "--max-message-mb",
            "8",
        ]);
        let Command::Broker(broker) = args.command else {
            panic!("expected broker subcommand");
        };
        let config = broker.into_config();
        assert_eq!(config.ingress.address, "tcp://0.0.0.0:7000");
        assert_eq!(config.egress.address, DEFAULT_EGRESS_ADDRESS);
        assert_eq!(config.ingress.recv_timeout, Duration::from_millis(200));
        assert_eq!(config.egress.max_message_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_watch_args() {
        let args = Args::parse_from(["fieldwatch-broker", "watch", "BlogPost.*", "--extended"]);
        let Command::Watch(watch) = args.command else {
            panic!("expected watch subcommand");
        };
        let config = watch.into_config();
        assert_eq!(config.pattern, "BlogPost.*");
        assert!(config.relay.extended_json);
        assert_eq!(config.egress.address, DEFAULT_EGRESS_ADDRESS);
    }

    #[test]
    fn test_publish_args() {
        let args = Args::parse_from([
            "fieldwatch-broker",
            "publish",
            "BlogPost.created",
            r#"{"name":"A"}"#,
        ]);
        let Command::Publish(publish) = args.command else {
            panic!("expected publish subcommand");
        };
        let config = publish.into_config();
        assert_eq!(config.channel, "BlogPost.created");
        assert_eq!(config.payload, r#"{"name":"A"}"#);
        assert!(!config.relay.extended_json);
    }
}
