//! Event derivation.
//!
//! Turns one [`MutationDescriptor`] into the ordered list of change events it
//! implies:
//!
//! - create: one `created` event carrying the record
//! - update: one collection-level `updated` event, then for every operator its
//!   leaf events (`updated:<path>`) followed by its ancestor events
//! - remove: one `removed` event carrying the snapshot, or the filter when the
//!   removal was a bulk one
//!
//! Raw whole-object updates are rewritten into an implicit `$set` first, so they
//! go through exactly the same leaf and ancestor machinery as operator updates.

use std::collections::{BTreeMap, HashSet};

use fieldwatch_proto::event::{CREATED, REMOVED, UPDATED};
use fieldwatch_proto::mutation::{is_reserved_key, ID_FIELD, OPERATOR_SIGIL};
use fieldwatch_proto::{
    ChangeEvent, Document, Identifier, MutationDescriptor, MutationKind, Operator, Scope,
    UpdateDocument, Value,
};

use crate::ancestor::AncestorAggregator;
use crate::config::EventsConfig;
use crate::error::DerivationError;

/// Update paths grouped by operator, in derivation order.
type OperatorPaths = BTreeMap<Operator, Document>;

/// Derives change events from mutation descriptors.
#[derive(Debug, Clone)]
pub struct EventDeriver {
    ignored_paths: HashSet<String>,
}

impl EventDeriver {
    /// Create a deriver using the ignored paths from `config`.
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            ignored_paths: config.ignored_paths.clone(),
        }
    }

    /// Check if a path is ignored.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.contains(path)
    }

    /// Derive the events for one mutation.
    pub fn derive(&self, descriptor: MutationDescriptor) -> Result<Vec<ChangeEvent>, DerivationError> {
        let MutationDescriptor {
            kind,
            filter,
            update,
            full_record,
        } = descriptor;

        match kind {
            MutationKind::Create => {
                let record = full_record.ok_or(DerivationError::MissingRecord)?;
                Ok(vec![ChangeEvent::new(CREATED, Scope::Entity, record)])
            }
            MutationKind::Update => {
                let update = update.ok_or(DerivationError::MissingUpdate)?;
                self.derive_update(filter, update)
            }
            MutationKind::Remove => Ok(vec![derive_remove(filter, full_record)]),
        }
    }

    fn derive_update(
        &self,
        filter: Document,
        update: UpdateDocument,
    ) -> Result<Vec<ChangeEvent>, DerivationError> {
        let operators = normalize_update(update)?;

        let any_modified = operators
            .values()
            .flat_map(|paths| paths.keys())
            .any(|path| !self.is_ignored(path));
        if !any_modified {
            tracing::trace!("every modified path is ignored, no events derived");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        let mut collection = Document::new();
        collection.insert("filter".to_string(), Value::Document(filter.clone()));
        collection.insert(
            "update".to_string(),
            Value::Document(flatten(&filter, &operators)),
        );
        events.push(ChangeEvent::new(UPDATED, Scope::Collection, collection));

        // Field events are keyed on the record id; without one only the
        // collection-level event fires.
        let Some(id) = filter.get(ID_FIELD).and_then(Value::as_identifier) else {
            tracing::debug!("update filter has no identifier, field events skipped");
            return Ok(events);
        };

        // A path fires at most once per mutation; a leaf named by any operator
        // always wins over the same path reached as an ancestor.
        let leaf_paths: HashSet<&str> = operators
            .values()
            .flat_map(|paths| paths.keys())
            .map(String::as_str)
            .collect();
        let mut emitted: HashSet<String> = HashSet::new();

        for (operator, paths) in &operators {
            let mut aggregator = AncestorAggregator::new();

            for (path, value) in paths {
                if self.is_ignored(path) {
                    continue;
                }
                aggregator.add_leaf(path, value);
                if !emitted.insert(path.clone()) {
                    continue;
                }
                let mut update = Document::new();
                update.insert(path.clone(), value.clone());
                events.push(field_event(path, &filter, *operator, id, update));
            }

            for ancestor in aggregator.finish() {
                if self.is_ignored(&ancestor.path)
                    || leaf_paths.contains(ancestor.path.as_str())
                    || !emitted.insert(ancestor.path.clone())
                {
                    continue;
                }
                let path = ancestor.path.clone();
                events.push(field_event(&path, &filter, *operator, id, ancestor.into_update()));
            }
        }

        Ok(events)
    }
}

/// Split an update document into per-operator path maps.
fn normalize_update(update: UpdateDocument) -> Result<OperatorPaths, DerivationError> {
    let is_raw = update.is_raw_update();
    let document = match update {
        UpdateDocument::Raw(doc) | UpdateDocument::Operators(doc) => doc,
    };
    if document.is_empty() {
        return Err(DerivationError::EmptyUpdate);
    }

    let mut operators = OperatorPaths::new();
    let mut implicit_set = Document::new();

    for (key, value) in document {
        if !key.starts_with(OPERATOR_SIGIL) {
            if !is_raw {
                return Err(DerivationError::AmbiguousUpdate(key));
            }
            if !is_reserved_key(&key) {
                implicit_set.insert(key, value);
            }
            continue;
        }

        let operator =
            Operator::from_name(&key).ok_or_else(|| DerivationError::UnknownOperator(key.clone()))?;
        let Value::Document(paths) = value else {
            return Err(DerivationError::MalformedOperator(key));
        };
        operators.entry(operator).or_default().extend(paths);
    }

    if !implicit_set.is_empty() {
        // Explicit `$set` entries win over plain keys naming the same path.
        let set = operators.entry(Operator::Set).or_default();
        for (path, value) in implicit_set {
            set.entry(path).or_insert(value);
        }
    }

    operators.retain(|_, paths| !paths.is_empty());
    if operators.is_empty() {
        return Err(DerivationError::EmptyUpdate);
    }

    Ok(operators)
}

/// Build the flat update carried by the collection-level event.
///
/// `$set` entries are merged in directly, other operators stay nested under
/// their operator name, and the filter's `_id` is injected when present.
fn flatten(filter: &Document, operators: &OperatorPaths) -> Document {
    let mut flat = Document::new();
    if let Some(id) = filter.get(ID_FIELD) {
        flat.insert(ID_FIELD.to_string(), id.clone());
    }
    for (operator, paths) in operators {
        match operator {
            Operator::Set => flat.extend(paths.iter().map(|(k, v)| (k.clone(), v.clone()))),
            other => {
                flat.insert(other.as_str().to_string(), Value::Document(paths.clone()));
            }
        }
    }
    flat
}

fn field_event(
    path: &str,
    filter: &Document,
    operator: Operator,
    id: Identifier,
    mut update: Document,
) -> ChangeEvent {
    update.insert(ID_FIELD.to_string(), Value::Identifier(id));

    let mut payload = Document::new();
    payload.insert("filter".to_string(), Value::Document(filter.clone()));
    payload.insert("operator".to_string(), Value::String(operator.as_str().to_string()));
    payload.insert("update".to_string(), Value::Document(update));
    ChangeEvent::field(path, payload)
}

fn derive_remove(filter: Document, snapshot: Option<Document>) -> ChangeEvent {
    match snapshot {
        Some(record) => ChangeEvent::new(REMOVED, Scope::Entity, record),
        None => {
            let mut payload = Document::new();
            payload.insert("filter".to_string(), Value::Document(filter));
            ChangeEvent::new(REMOVED, Scope::Collection, payload)
        }
    }
}
