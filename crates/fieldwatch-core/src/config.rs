//! Event derivation and emission configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Paths ignored unless configured otherwise.
pub const DEFAULT_IGNORED_PATHS: [&str; 2] = ["updatedAt", "createdAt"];

/// How derived events reach in-process listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionMode {
    /// Listeners run inline, before the mutation call returns.
    Synchronous,
    /// Listeners run on a dedicated worker, in FIFO order.
    #[default]
    Deferred,
}

/// Configuration for one change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Paths that never produce field events.
    pub ignored_paths: HashSet<String>,

    /// Delivery mode for in-process listeners.
    pub emission_mode: EmissionMode,
}

impl EventsConfig {
    /// Create a configuration with the default ignored paths and deferred emission.
    pub fn new() -> Self {
        Self {
            ignored_paths: DEFAULT_IGNORED_PATHS.iter().map(|p| p.to_string()).collect(),
            emission_mode: EmissionMode::default(),
        }
    }

    /// Replace the ignored path set.
    pub fn with_ignored_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Add one ignored path.
    pub fn ignore_path(mut self, path: impl Into<String>) -> Self {
        self.ignored_paths.insert(path.into());
        self
    }

    /// Set the emission mode.
    pub fn with_emission_mode(mut self, mode: EmissionMode) -> Self {
        self.emission_mode = mode;
        self
    }

    /// Check if a path is ignored.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.contains(path)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self::new()
    }
}
