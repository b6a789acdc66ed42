//! Delete-Update-Insert reconciliation.
//!
//! [`dui`] diffs a batch of incoming dictionaries against the records a
//! predicate selects, matching them by a primary-key field, and calls a
//! handler once per resulting operation:
//!
//! | key is in          | operation |
//! |--------------------|-----------|
//! | incoming and store | `Update`  |
//! | incoming only      | `Insert`  |
//! | store only         | `Delete`  |
//!
//! Updates and inserts are reported in input order, then deletes in store
//! order. The engine changes nothing itself; [`mirror_handler`] is a handler
//! that applies every operation to the session, after which a `save` commits
//! the whole reconciliation at once.
//!
//! The classification itself is available without a store as [`plan`].

use crate::error::{CoreError, CoreResult, ValidationErrors};
use crate::predicate::{FetchRequest, Predicate};
use crate::record::Record;
use crate::session::Session;
use stackdb_codec::{RecordDictionary, Value};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Kind of reconciliation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuiOperation {
    /// A new record should be created.
    Insert,
    /// An existing record should take the incoming values.
    Update,
    /// An existing record has no incoming counterpart.
    Delete,
}

impl fmt::Display for DuiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// One operation handed to a reconciliation handler.
#[derive(Debug, Clone, Copy)]
pub enum DuiChange<'a> {
    /// Create a record from `data`.
    Insert {
        /// Incoming dictionary.
        data: &'a RecordDictionary,
    },
    /// Bring `record` in line with `data`.
    Update {
        /// The existing record, as fetched into the session.
        record: &'a Record,
        /// Incoming dictionary with the same key.
        data: &'a RecordDictionary,
    },
    /// Remove `record`.
    Delete {
        /// The existing record.
        record: &'a Record,
    },
}

impl<'a> DuiChange<'a> {
    /// The operation kind.
    #[must_use]
    pub fn operation(&self) -> DuiOperation {
        match self {
            Self::Insert { .. } => DuiOperation::Insert,
            Self::Update { .. } => DuiOperation::Update,
            Self::Delete { .. } => DuiOperation::Delete,
        }
    }

    /// The existing record, for updates and deletes.
    #[must_use]
    pub fn record(&self) -> Option<&'a Record> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { record, .. } | Self::Delete { record } => Some(record),
        }
    }

    /// The incoming dictionary, for inserts and updates.
    #[must_use]
    pub fn data(&self) -> Option<&'a RecordDictionary> {
        match self {
            Self::Insert { data } | Self::Update { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuiSummary {
    /// Insert operations, keyless ones included.
    pub inserted: usize,
    /// Update operations.
    pub updated: usize,
    /// Delete operations.
    pub deleted: usize,
    /// Incoming dictionaries without a key, inserted unconditionally.
    pub keyless: usize,
    /// Incoming dictionaries skipped because their key was already seen.
    pub duplicates: usize,
    /// Existing records ignored because their key was already seen.
    pub existing_duplicates: usize,
    /// Existing records ignored because they have no key.
    pub existing_keyless: usize,
}

impl DuiSummary {
    /// Number of handler calls.
    #[must_use]
    pub const fn operations(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// One step of a [`DuiPlan`], by position in the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuiStep {
    /// Insert `incoming[incoming]`.
    Insert {
        /// Position in the incoming keys.
        incoming: usize,
    },
    /// Update `existing[existing]` from `incoming[incoming]`.
    Update {
        /// Position in the existing keys.
        existing: usize,
        /// Position in the incoming keys.
        incoming: usize,
    },
    /// Delete `existing[existing]`.
    Delete {
        /// Position in the existing keys.
        existing: usize,
    },
}

/// Result of classifying keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuiPlan {
    /// Steps in the order a handler sees them.
    pub steps: Vec<DuiStep>,
    /// Counts of the steps and of what was ignored.
    pub summary: DuiSummary,
}

/// Classifies keys into inserts, updates and deletes.
///
/// `existing` holds the key of each existing record in store order and
/// `incoming` the key of each incoming dictionary in input order; `None`
/// marks a missing or `Null` key. An existing key seen twice keeps its first
/// record. An incoming key seen twice is handled once, at its first
/// occurrence.
#[must_use]
pub fn plan<'a>(existing: &[Option<&'a Value>], incoming: &[Option<&'a Value>]) -> DuiPlan {
    let mut summary = DuiSummary::default();
    let mut by_key: HashMap<&'a Value, usize> = HashMap::with_capacity(existing.len());
    for (index, key) in existing.iter().copied().enumerate() {
        let Some(key) = key else {
            tracing::warn!(index, "existing record has no key, ignoring it");
            summary.existing_keyless += 1;
            continue;
        };
        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
            Entry::Occupied(first) => {
                tracing::warn!(%key, index, first = *first.get(), "duplicate existing key, ignoring later record");
                summary.existing_duplicates += 1;
            }
        }
    }

    let mut steps = Vec::with_capacity(incoming.len() + existing.len());
    let mut seen: HashSet<&'a Value> = HashSet::with_capacity(incoming.len());
    for (index, key) in incoming.iter().copied().enumerate() {
        let Some(key) = key else {
            summary.keyless += 1;
            summary.inserted += 1;
            steps.push(DuiStep::Insert { incoming: index });
            continue;
        };
        if !seen.insert(key) {
            tracing::warn!(%key, index, "duplicate incoming key, skipping");
            summary.duplicates += 1;
            continue;
        }
        match by_key.get(key) {
            Some(&existing) => {
                summary.updated += 1;
                steps.push(DuiStep::Update { existing, incoming: index });
            }
            None => {
                summary.inserted += 1;
                steps.push(DuiStep::Insert { incoming: index });
            }
        }
    }

    for (index, key) in existing.iter().copied().enumerate() {
        let Some(key) = key else { continue };
        if by_key.get(key) == Some(&index) && !seen.contains(key) {
            summary.deleted += 1;
            steps.push(DuiStep::Delete { existing: index });
        }
    }

    DuiPlan { steps, summary }
}

fn key_of<'a>(value: Option<&'a Value>) -> Option<&'a Value> {
    value.filter(|v| !matches!(v, Value::Null))
}

/// Reconciles `objects` against the records of `entity` matching `predicate`.
///
/// Every incoming dictionary is validated against the entity before the
/// handler is called for the first time. The handler decides what each
/// operation means; an error from it stops the pass and is returned as is.
///
/// # Errors
///
/// - [`CoreError::FetchFailed`] if the existing records cannot be fetched
/// - [`CoreError::UnknownAttribute`] if `pkey` is not an attribute of `entity`
/// - [`CoreError::ValidationFailed`] listing every problem in `objects`
/// - whatever the handler returns
pub fn dui<F>(
    session: &Session,
    entity: &str,
    predicate: &Predicate,
    objects: &[RecordDictionary],
    pkey: &str,
    mut handler: F,
) -> CoreResult<DuiSummary>
where
    F: FnMut(DuiChange<'_>) -> CoreResult<()>,
{
    let existing = session.fetch(&FetchRequest::new(entity).predicate(predicate.clone()))?;
    let description = session
        .entity_description(entity)
        .map_err(|e| CoreError::fetch_failed(entity, e))?;
    if !description.has_attribute(pkey) {
        return Err(CoreError::UnknownAttribute {
            entity: entity.to_string(),
            attribute: pkey.to_string(),
        });
    }

    let mut problems = ValidationErrors::new();
    for object in objects {
        problems.merge(description.validate_fields(object, None));
    }
    problems.into_result()?;

    let existing_values: Vec<Option<Value>> = existing.iter().map(|r| r.get(pkey)).collect();
    let existing_keys: Vec<Option<&Value>> = existing_values.iter().map(|v| key_of(v.as_ref())).collect();
    let incoming_keys: Vec<Option<&Value>> = objects.iter().map(|o| key_of(o.get(pkey))).collect();
    let DuiPlan { steps, summary } = plan(&existing_keys, &incoming_keys);

    for step in steps {
        let change = match step {
            DuiStep::Insert { incoming } => DuiChange::Insert {
                data: &objects[incoming],
            },
            DuiStep::Update { existing: e, incoming } => DuiChange::Update {
                record: &existing[e],
                data: &objects[incoming],
            },
            DuiStep::Delete { existing: e } => DuiChange::Delete { record: &existing[e] },
        };
        handler(change)?;
    }

    tracing::debug!(
        context = %session.context_id(),
        entity,
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        skipped = summary.duplicates,
        "reconciled"
    );
    Ok(summary)
}

/// A handler that makes the session mirror the incoming batch.
///
/// Inserts create records from the dictionaries, updates apply them and
/// deletes delete. Nothing is saved.
pub fn mirror_handler(session: &Session, entity: &str) -> impl FnMut(DuiChange<'_>) -> CoreResult<()> {
    let session = session.clone();
    let entity = entity.to_string();
    move |change| match change {
        DuiChange::Insert { data } => session.insert_with_dictionary(&entity, data).map(drop),
        DuiChange::Update { record, data } => record.apply_dictionary(data),
        DuiChange::Delete { record } => session.delete(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::coordinator::{Coordinator, StoreSlot};
    use crate::schema::Schema;
    use crate::types::{ContextId, ContextKind};
    use proptest::prelude::*;
    use stackdb_storage::InMemoryBackend;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn key(v: i64) -> Value {
        Value::Integer(v)
    }

    fn session() -> Session {
        let schema = Schema::from_json_str(
            r#"{"entities":[{"name":"Person","attributes":[
                {"name":"uid","type":"integer","optional":true},
                {"name":"name","type":"text","optional":true}]}]}"#,
        )
        .unwrap();
        let c = Coordinator::with_backend(schema, Box::new(InMemoryBackend::new()), StoreOptions::default()).unwrap();
        let slot = Arc::new(StoreSlot::new(PathBuf::from("mem"), Some(c)));
        Session::new(ContextId::next(), ContextKind::Background, slot)
    }

    fn person(uid: i64, name: &str) -> RecordDictionary {
        RecordDictionary::new().with("uid", uid).with("name", name)
    }

    fn seed(session: &Session, people: &[RecordDictionary]) {
        for p in people {
            session.insert_with_dictionary("Person", p).unwrap();
        }
        session.save().unwrap();
    }

    #[test]
    fn plan_classifies_keys() {
        let (a, b, c, d) = (key(1), key(2), key(3), key(4));
        let plan = plan(&[Some(&a), Some(&b), Some(&c)], &[Some(&c), Some(&d), Some(&a)]);
        assert_eq!(
            plan.steps,
            vec![
                DuiStep::Update { existing: 2, incoming: 0 },
                DuiStep::Insert { incoming: 1 },
                DuiStep::Update { existing: 0, incoming: 2 },
                DuiStep::Delete { existing: 1 },
            ]
        );
        assert_eq!((plan.summary.inserted, plan.summary.updated, plan.summary.deleted), (1, 2, 1));
    }

    #[test]
    fn plan_edge_cases() {
        let (a, b) = (key(1), key(2));
        let everything_goes = plan(&[Some(&a), Some(&b)], &[]);
        assert_eq!(everything_goes.summary.deleted, 2);
        assert_eq!(everything_goes.summary.inserted, 0);

        let everything_new = plan(&[], &[Some(&b), None, Some(&a)]);
        assert_eq!(
            everything_new.steps,
            vec![
                DuiStep::Insert { incoming: 0 },
                DuiStep::Insert { incoming: 1 },
                DuiStep::Insert { incoming: 2 },
            ]
        );
        assert_eq!(everything_new.summary.keyless, 1);
    }

    #[test]
    fn plan_duplicates_first_wins() {
        let (a, b) = (key(1), key(2));
        let plan = plan(&[Some(&a), Some(&a), None, Some(&b)], &[Some(&a), Some(&a), None, None]);
        assert_eq!(
            plan.steps,
            vec![
                DuiStep::Update { existing: 0, incoming: 0 },
                DuiStep::Insert { incoming: 2 },
                DuiStep::Insert { incoming: 3 },
                DuiStep::Delete { existing: 3 },
            ]
        );
        assert_eq!(plan.summary.duplicates, 1);
        assert_eq!(plan.summary.existing_duplicates, 1);
        assert_eq!(plan.summary.existing_keyless, 1);
        assert_eq!(plan.summary.keyless, 2);
    }

    #[test]
    fn update_receives_the_fetched_record() {
        let session = session();
        seed(&session, &[person(1, "Ada"), person(2, "Grace")]);
        let fetched = session.fetch(&FetchRequest::new("Person")).unwrap();

        let mut updated = Vec::new();
        dui(&session, "Person", &Predicate::All, &[person(2, "G. Hopper")], "uid", |change| {
            if let DuiChange::Update { record, .. } = change {
                updated.push(record.clone());
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(updated.len(), 1);
        assert!(updated[0].same_record(&fetched[1]));
    }

    #[test]
    fn mirror_handler_applies_everything() {
        let session = session();
        seed(&session, &[person(1, "Ada"), person(2, "Grace"), person(3, "Edsger")]);

        let incoming = [person(3, "Dijkstra"), person(4, "Barbara"), person(1, "Lovelace")];
        let summary = dui(
            &session,
            "Person",
            &Predicate::All,
            &incoming,
            "uid",
            mirror_handler(&session, "Person"),
        )
        .unwrap();
        session.save().unwrap();

        assert_eq!(summary.operations(), 4);
        let names: Vec<Value> = session
            .fetch_dictionaries(&FetchRequest::new("Person").sort_by(crate::predicate::SortDescriptor::ascending("uid")))
            .unwrap()
            .into_iter()
            .filter_map(|d| d.get("name").cloned())
            .collect();
        assert_eq!(
            names,
            vec![Value::from("Lovelace"), Value::from("Dijkstra"), Value::from("Barbara")]
        );
    }

    #[test]
    fn predicate_scopes_the_existing_set() {
        let session = session();
        seed(&session, &[person(1, "Ada"), person(2, "Grace")]);

        let summary = dui(&session, "Person", &Predicate::eq("uid", 1), &[], "uid", |_| Ok(())).unwrap();
        assert_eq!(summary.deleted, 1);
    }

    #[test]
    fn invalid_input_fails_before_any_handler_call() {
        let session = session();
        let bad = [person(1, "ok"), RecordDictionary::new().with("uid", "x").with("age", 3)];
        let mut calls = 0;
        let err = dui(&session, "Person", &Predicate::All, &bad, "uid", |_| {
            calls += 1;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.validation_errors().map(ValidationErrors::len), Some(2));
        assert_eq!(calls, 0);

        let err = dui(&session, "Person", &Predicate::All, &[], "nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::UnknownAttribute { .. }));

        let err = dui(&session, "Ghost", &Predicate::All, &[], "uid", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed { .. }));
    }

    #[test]
    fn handler_error_aborts() {
        let session = session();
        let mut calls = 0;
        let err = dui(
            &session,
            "Person",
            &Predicate::All,
            &[person(1, "a"), person(2, "b")],
            "uid",
            |_| {
                calls += 1;
                Err(CoreError::invalid_operation("stop"))
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert_eq!(calls, 1);
    }

    proptest! {
        #[test]
        fn every_key_gets_exactly_one_operation(
            existing in proptest::collection::hash_set(0i64..40, 0..20),
            incoming in proptest::collection::vec(0i64..40, 0..30),
        ) {
            let existing: Vec<Value> = existing.into_iter().map(key).collect();
            let incoming: Vec<Value> = incoming.into_iter().map(key).collect();
            let e: Vec<Option<&Value>> = existing.iter().map(Some).collect();
            let n: Vec<Option<&Value>> = incoming.iter().map(Some).collect();
            let plan = plan(&e, &n);

            let e_set: HashSet<&Value> = existing.iter().collect();
            let n_set: HashSet<&Value> = incoming.iter().collect();
            prop_assert_eq!(plan.summary.updated, e_set.intersection(&n_set).count());
            prop_assert_eq!(plan.summary.inserted, n_set.difference(&e_set).count());
            prop_assert_eq!(plan.summary.deleted, e_set.difference(&n_set).count());
            prop_assert_eq!(plan.steps.len(), e_set.union(&n_set).count());
            prop_assert_eq!(plan.summary.duplicates, incoming.len() - n_set.len());
        }
    }
}
