//! Relay configuration.

use fieldwatch_proto::Codec;
use tracing::Level;

use crate::pattern::{default_allow_list, RelayFilter};

/// Emit a tracing event at a level chosen at runtime.
///
/// Used for relay lifecycle messages whose level follows
/// [`RelayConfig::verbosity`].
#[macro_export]
macro_rules! relay_log {
    ($level:expr, $($arg:tt)+) => {{
        let level: ::tracing::Level = $level;
        if level == ::tracing::Level::ERROR {
            ::tracing::error!($($arg)+)
        } else if level == ::tracing::Level::WARN {
            ::tracing::warn!($($arg)+)
        } else if level == ::tracing::Level::INFO {
            ::tracing::info!($($arg)+)
        } else if level == ::tracing::Level::DEBUG {
            ::tracing::debug!($($arg)+)
        } else {
            ::tracing::trace!($($arg)+)
        }
    }};
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Event names published to the broker.
    pub allow_list: Vec<RelayFilter>,

    /// Encode payloads as extended JSON, keeping identifier and timestamp types.
    pub extended_json: bool,

    /// Level of subscribe, unsubscribe and publish lifecycle messages.
    pub verbosity: Level,
}

impl RelayConfig {
    /// Create a configuration with the default allow-list.
    pub fn new() -> Self {
        Self {
            allow_list: default_allow_list(),
            extended_json: false,
            verbosity: Level::DEBUG,
        }
    }

    /// Replace the allow-list.
    pub fn with_allow_list(mut self, allow_list: Vec<RelayFilter>) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Add one allow-list entry.
    pub fn allow(mut self, filter: RelayFilter) -> Self {
        self.allow_list.push(filter);
        self
    }

    /// Enable or disable extended JSON.
    pub fn with_extended_json(mut self, extended: bool) -> Self {
        self.extended_json = extended;
        self
    }

    /// Set the lifecycle log level.
    pub fn with_verbosity(mut self, level: Level) -> Self {
        self.verbosity = level;
        self
    }

    /// Payload codec for this configuration.
    pub fn codec(&self) -> Codec {
        Codec::from_extended(self.extended_json)
    }

    /// Check if an event name may be relayed.
    pub fn allows(&self, event: &str) -> bool {
        self.allow_list.iter().any(|filter| filter.matches(event))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.allows("created"));
        assert!(config.allows("updated:name"));
        assert!(!config.allows("saved"));
        assert_eq!(config.codec(), Codec::Standard);
        assert_eq!(config.verbosity, Level::DEBUG);
    }

    #[test]
    fn test_config_builder() {
        let config = RelayConfig::new()
            .with_allow_list(vec![RelayFilter::exact("removed")])
            .allow(RelayFilter::pattern("^updated:content\\.").unwrap())
            .with_extended_json(true)
            .with_verbosity(Level::INFO);

        assert!(config.allows("removed"));
        assert!(config.allows("updated:content.k"));
        assert!(!config.allows("created"));
        assert!(!config.allows("updated:name"));
        assert_eq!(config.codec(), Codec::Extended);
        assert_eq!(config.verbosity, Level::INFO);
    }

    #[test]
    fn test_relay_log_accepts_every_level() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            relay_log!(level, pattern = "Post.*", "pattern subscribed");
        }
    }
}
