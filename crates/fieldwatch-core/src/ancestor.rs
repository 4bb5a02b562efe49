//! Ancestor path aggregation.
//!
//! Given the leaf paths one operator touched, the aggregator computes one merged
//! update per ancestor path. Leaves `content.a = 1` and `content.b = 2` both
//! roll up into `content: {a: 1, b: 2}`. When two leaves write the same key
//! below an ancestor, the leaf added last wins.

use std::collections::HashMap;

use fieldwatch_proto::{Document, Value};

use crate::path::{ancestors, relative_to, set_path};

/// The merged update for one ancestor path.
#[derive(Debug, Clone, PartialEq)]
pub struct AncestorUpdate {
    /// Dotted ancestor path.
    pub path: String,
    /// Values of all leaves below `path`, nested relative to it.
    pub merged: Document,
}

impl AncestorUpdate {
    /// The update as it appears in a field event: `{<path>: merged}`.
    pub fn into_update(self) -> Document {
        let mut update = Document::new();
        update.insert(self.path, Value::Document(self.merged));
        update
    }
}

/// Accumulates leaves and merges them per ancestor.
#[derive(Debug, Default)]
pub struct AncestorAggregator {
    /// Ancestors in first-seen order.
    order: Vec<String>,
    merged: HashMap<String, Document>,
}

impl AncestorAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf path and its value.
    pub fn add_leaf(&mut self, leaf: &str, value: &Value) {
        for ancestor in ancestors(leaf) {
            let Some(below) = relative_to(leaf, ancestor) else {
                continue;
            };
            if !self.merged.contains_key(ancestor) {
                self.order.push(ancestor.to_string());
            }
            let merged = self.merged.entry(ancestor.to_string()).or_default();
            set_path(merged, below, value.clone());
        }
    }

    /// Number of distinct ancestors seen so far.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if no ancestor has been seen.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consume the aggregator, yielding ancestors in first-seen order.
    pub fn finish(mut self) -> Vec<AncestorUpdate> {
        self.order
            .into_iter()
            .map(|path| {
                let merged = self.merged.remove(&path).unwrap_or_default();
                AncestorUpdate { path, merged }
            })
            .collect()
    }
}

/// Aggregate a set of leaves in one call.
pub fn aggregate<'a, I>(leaves: I) -> Vec<AncestorUpdate>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut aggregator = AncestorAggregator::new();
    for (leaf, value) in leaves {
        aggregator.add_leaf(leaf, value);
    }
    aggregator.finish()
}
