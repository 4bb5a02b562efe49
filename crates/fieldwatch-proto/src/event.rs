//! Change events produced from mutations.

use crate::value::Document;

/// Name of the event fired when a record is created.
pub const CREATED: &str = "created";

/// Name of the collection-level event fired for any update.
pub const UPDATED: &str = "updated";

/// Name of the event fired when records are removed.
pub const REMOVED: &str = "removed";

/// Prefix of per-path field events (`updated:<dotted.path>`).
pub const FIELD_PREFIX: &str = "updated:";

/// Delivery scope of an event.
///
/// The scope decides which in-process channels an event is delivered on:
/// entity events reach the `doc:`, `model:` and raw channels, collection events
/// the `model:` and raw channels, raw events only the raw channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Entity,
    Collection,
    Raw,
}

impl Scope {
    /// Channel prefix for this scope.
    pub fn prefix(&self) -> &'static str {
        match self {
            Scope::Entity => "doc:",
            Scope::Collection => "model:",
            Scope::Raw => "",
        }
    }

    /// Scopes an event of this scope is delivered on, in delivery order.
    pub fn delivery_scopes(&self) -> &'static [Scope] {
        match self {
            Scope::Entity => &[Scope::Entity, Scope::Collection, Scope::Raw],
            Scope::Collection => &[Scope::Collection, Scope::Raw],
            Scope::Raw => &[Scope::Raw],
        }
    }
}

/// A derived change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Event name (`created`, `updated`, `updated:<path>`, `removed`).
    pub name: String,
    /// Delivery scope.
    pub scope: Scope,
    /// Event payload.
    pub payload: Document,
}

impl ChangeEvent {
    /// Create a new event.
    pub fn new(name: impl Into<String>, scope: Scope, payload: Document) -> Self {
        Self {
            name: name.into(),
            scope,
            payload,
        }
    }

    /// A field event for `path`.
    pub fn field(path: &str, payload: Document) -> Self {
        Self::new(format!("{}{}", FIELD_PREFIX, path), Scope::Entity, payload)
    }

    /// The dotted path of a field event.
    pub fn field_path(&self) -> Option<&str> {
        self.name.strip_prefix(FIELD_PREFIX)
    }

    /// Channel name for delivery on `scope` (`doc:created`, `model:updated`, ...).
    pub fn channel(&self, scope: Scope) -> String {
        format!("{}{}", scope.prefix(), self.name)
    }
}
