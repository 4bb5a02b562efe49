//! Mutation descriptors handed over by the persistence layer.

use std::fmt;

use crate::value::{get_path, Document, Identifier, Value};

/// Prefix that marks an update operator key (`$set`, `$inc`, ...).
pub const OPERATOR_SIGIL: char = '$';

/// Field holding the record identifier in filters and records.
pub const ID_FIELD: &str = "_id";

/// An update operator.
///
/// Variants are declared in the order field events are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Set,
    Unset,
    Inc,
    Mul,
    Rename,
    Min,
    Max,
    AddToSet,
    Pop,
    Pull,
    PullAll,
    Push,
    PushAll,
}

impl Operator {
    /// Every recognized operator, in derivation order.
    pub const ALL: [Operator; 13] = [
        Operator::Set,
        Operator::Unset,
        Operator::Inc,
        Operator::Mul,
        Operator::Rename,
        Operator::Min,
        Operator::Max,
        Operator::AddToSet,
        Operator::Pop,
        Operator::Pull,
        Operator::PullAll,
        Operator::Push,
        Operator::PushAll,
    ];

    /// Wire name, including the sigil.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Set => "$set",
            Operator::Unset => "$unset",
            Operator::Inc => "$inc",
            Operator::Mul => "$mul",
            Operator::Rename => "$rename",
            Operator::Min => "$min",
            Operator::Max => "$max",
            Operator::AddToSet => "$addToSet",
            Operator::Pop => "$pop",
            Operator::Pull => "$pull",
            Operator::PullAll => "$pullAll",
            Operator::Push => "$push",
            Operator::PushAll => "$pushAll",
        }
    }

    /// Look up an operator by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether a top-level update key is reserved (operator keys and `_id`).
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(OPERATOR_SIGIL) || key == ID_FIELD
}

/// The kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Remove,
}

/// An update document with an explicit raw/operator discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDocument {
    /// A whole-object write: plain keys are assigned as if under `$set`.
    Raw(Document),
    /// An operator-keyed document (`{"$set": {..}, "$inc": {..}}`).
    Operators(Document),
}

impl UpdateDocument {
    /// Start building an operator update.
    pub fn builder() -> UpdateBuilder {
        UpdateBuilder::default()
    }

    /// Whether this is a raw whole-object write.
    pub fn is_raw_update(&self) -> bool {
        matches!(self, UpdateDocument::Raw(_))
    }

    /// The underlying document.
    pub fn document(&self) -> &Document {
        match self {
            UpdateDocument::Raw(doc) | UpdateDocument::Operators(doc) => doc,
        }
    }

    /// Check if the document has no keys at all.
    pub fn is_empty(&self) -> bool {
        self.document().is_empty()
    }
}

/// Builder for operator updates.
#[derive(Debug, Clone, Default)]
pub struct UpdateBuilder {
    operators: Document,
}

impl UpdateBuilder {
    /// Add `path: value` under `operator`.
    pub fn op(mut self, operator: Operator, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let entry = self
            .operators
            .entry(operator.as_str().to_string())
            .or_insert_with(|| Value::Document(Document::new()));
        if let Some(paths) = entry.as_document_mut() {
            paths.insert(path.into(), value.into());
        }
        self
    }

    /// Add a `$set` entry.
    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(Operator::Set, path, value)
    }

    /// Add an `$unset` entry.
    pub fn unset(self, path: impl Into<String>) -> Self {
        self.op(Operator::Unset, path, "")
    }

    /// Add an `$inc` entry.
    pub fn inc(self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.op(Operator::Inc, path, by)
    }

    /// Finish the update.
    pub fn build(self) -> UpdateDocument {
        UpdateDocument::Operators(self.operators)
    }
}

/// A description of one mutation, as handed over by the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationDescriptor {
    /// Create, update or remove.
    pub kind: MutationKind,
    /// Filter that selected the affected record(s).
    pub filter: Document,
    /// Update document (updates only).
    pub update: Option<UpdateDocument>,
    /// Full record: the created record, or the removed record's last snapshot.
    pub full_record: Option<Document>,
}

impl MutationDescriptor {
    /// Describe the creation of `record`.
    pub fn create(record: Document) -> Self {
        let mut filter = Document::new();
        if let Some(id) = record.get(ID_FIELD) {
            filter.insert(ID_FIELD.to_string(), id.clone());
        }
        Self {
            kind: MutationKind::Create,
            filter,
            update: None,
            full_record: Some(record),
        }
    }

    /// Describe an update of the records matched by `filter`.
    pub fn update(filter: Document, update: UpdateDocument) -> Self {
        Self {
            kind: MutationKind::Update,
            filter,
            update: Some(update),
            full_record: None,
        }
    }

    /// Describe a raw whole-object update.
    pub fn raw_update(filter: Document, update: Document) -> Self {
        Self::update(filter, UpdateDocument::Raw(update))
    }

    /// Describe an operator-keyed update.
    pub fn operator_update(filter: Document, update: Document) -> Self {
        Self::update(filter, UpdateDocument::Operators(update))
    }

    /// Describe a removal where only the filter is known (bulk removal).
    pub fn remove(filter: Document) -> Self {
        Self {
            kind: MutationKind::Remove,
            filter,
            update: None,
            full_record: None,
        }
    }

    /// Describe the removal of a single record whose last state is known.
    pub fn remove_snapshot(filter: Document, snapshot: Document) -> Self {
        Self {
            full_record: Some(snapshot),
            ..Self::remove(filter)
        }
    }

    /// Describe an imperative save of an existing record.
    ///
    /// The modified paths are resolved against the saved record and expressed
    /// as a raw update keyed on the record's `_id`, so a save derives the same
    /// events as the equivalent `$set`.
    pub fn from_save<S: AsRef<str>>(record: &Document, modified_paths: &[S]) -> Self {
        let mut filter = Document::new();
        if let Some(id) = record.get(ID_FIELD) {
            filter.insert(ID_FIELD.to_string(), id.clone());
        }

        let update = modified_paths
            .iter()
            .map(|path| path.as_ref())
            .filter(|path| *path != ID_FIELD)
            .map(|path| {
                let value = get_path(record, path).cloned().unwrap_or(Value::Null);
                (path.to_string(), value)
            })
            .collect();

        Self::raw_update(filter, update)
    }

    /// The explicit raw/operator discriminant, when an update is present.
    pub fn is_raw_update(&self) -> Option<bool> {
        self.update.as_ref().map(UpdateDocument::is_raw_update)
    }

    /// The `_id` in the filter, whatever its type.
    pub fn filter_id(&self) -> Option<&Value> {
        self.filter.get(ID_FIELD)
    }

    /// The `_id` in the filter when it is a tagged identifier.
    pub fn identifier(&self) -> Option<Identifier> {
        self.filter_id().and_then(Value::as_identifier)
    }
}
