//! Live records registered in a context.

use crate::error::{CoreError, CoreResult, ValidationErrors};
use crate::schema::EntityDescription;
use crate::types::{ContextId, ObjectId};
use stackdb_codec::{RecordDictionary, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Lifecycle of a record within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Created in the context and not saved yet.
    Inserted,
    /// Backed by a committed record.
    Persisted,
    /// Deleted in the context.
    Deleted,
}

/// A stored entity instance as seen through one context.
///
/// `Record` is a cheap handle; clones refer to the same instance and
/// [`same_record`](Self::same_record) tells whether two handles are one
/// record. Records are neither `Send` nor `Sync`: they stay on the thread of
/// the context that produced them. To hand a record to another context, pass
/// its [`ObjectId`] or a [`dictionary`](Self::dictionary) copy.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

struct RecordInner {
    id: ObjectId,
    context: ContextId,
    entity: Arc<EntityDescription>,
    seq: Cell<u64>,
    state: RefCell<RecordState>,
}

struct RecordState {
    fields: RecordDictionary,
    status: RecordStatus,
    dirty: bool,
}

impl Record {
    pub(crate) fn new(
        id: ObjectId,
        context: ContextId,
        entity: Arc<EntityDescription>,
        seq: u64,
        fields: RecordDictionary,
        status: RecordStatus,
    ) -> Self {
        Self {
            inner: Rc::new(RecordInner {
                id,
                context,
                entity,
                seq: Cell::new(seq),
                state: RefCell::new(RecordState {
                    fields,
                    status,
                    dirty: false,
                }),
            }),
        }
    }

    /// Durable identity.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.inner.entity.name
    }

    /// Entity description.
    #[must_use]
    pub fn description(&self) -> &EntityDescription {
        &self.inner.entity
    }

    /// The context this record belongs to.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    /// Current value of `field`; `None` if the field is not set.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.borrow().fields.get(field).cloned()
    }

    /// A detached copy of every field.
    #[must_use]
    pub fn dictionary(&self) -> RecordDictionary {
        self.inner.state.borrow().fields.clone()
    }

    /// Sets one field after checking it against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationFailed`] for an unknown field or a type
    /// mismatch, and [`CoreError::InvalidOperation`] on a deleted record.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.ensure_live()?;
        let value = value.into();
        if let Some(error) = self.inner.entity.check_field(field, &value, Some(self.inner.id)) {
            let mut errors = ValidationErrors::new();
            errors.push(error);
            return errors.into_result();
        }
        let mut state = self.inner.state.borrow_mut();
        state.fields.insert(field, value);
        state.dirty = true;
        Ok(())
    }

    /// Copies every field of `dict` onto the record.
    ///
    /// The dictionary is validated as a whole first; on any problem nothing
    /// is changed and every problem is reported.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationFailed`] with all problems, or
    /// [`CoreError::InvalidOperation`] on a deleted record.
    pub fn apply_dictionary(&self, dict: &RecordDictionary) -> CoreResult<()> {
        self.ensure_live()?;
        self.inner
            .entity
            .validate_fields(dict, Some(self.inner.id))
            .into_result()?;
        if dict.is_empty() {
            return Ok(());
        }
        let mut state = self.inner.state.borrow_mut();
        state.fields.extend(dict.iter().map(|(k, v)| (k.clone(), v.clone())));
        state.dirty = true;
        Ok(())
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.inner.state.borrow().status
    }

    /// Returns true if the record was inserted and not saved yet.
    #[must_use]
    pub fn is_inserted(&self) -> bool {
        self.status() == RecordStatus::Inserted
    }

    /// Returns true if the record was deleted in its context.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status() == RecordStatus::Deleted
    }

    /// Returns true if saving the context would write this record.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let state = self.inner.state.borrow();
        state.dirty || state.status != RecordStatus::Persisted
    }

    /// Returns true if both handles refer to the same record instance.
    #[must_use]
    pub fn same_record(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn seq(&self) -> u64 {
        self.inner.seq.get()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.inner.state.borrow().dirty
    }

    /// Takes new committed values, unless the record has unsaved changes.
    pub(crate) fn refresh(&self, fields: RecordDictionary) {
        let mut state = self.inner.state.borrow_mut();
        if state.status == RecordStatus::Persisted && !state.dirty {
            state.fields = fields;
        }
    }

    /// Marks a successful save.
    pub(crate) fn mark_saved(&self, seq: u64) {
        self.inner.seq.set(seq);
        let mut state = self.inner.state.borrow_mut();
        state.status = RecordStatus::Persisted;
        state.dirty = false;
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.state.borrow_mut().status = RecordStatus::Deleted;
    }

    /// Discards unsaved changes, going back to committed `fields`.
    pub(crate) fn restore(&self, fields: RecordDictionary) {
        let mut state = self.inner.state.borrow_mut();
        state.fields = fields;
        state.status = RecordStatus::Persisted;
        state.dirty = false;
    }

    fn ensure_live(&self) -> CoreResult<()> {
        if self.is_deleted() {
            return Err(CoreError::invalid_operation(format!(
                "{} {} has been deleted",
                self.entity(),
                self.id()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Record")
            .field("id", &self.inner.id)
            .field("entity", &self.inner.entity.name)
            .field("status", &state.status)
            .field("dirty", &state.dirty)
            .field("fields", &state.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDescription, AttributeType};

    fn person() -> Arc<EntityDescription> {
        Arc::new(EntityDescription::new(
            "Person",
            vec![
                AttributeDescription::required("id", AttributeType::Integer),
                AttributeDescription::optional("name", AttributeType::Text),
            ],
        ))
    }

    fn persisted() -> Record {
        Record::new(
            ObjectId::new(),
            ContextId::next(),
            person(),
            0,
            RecordDictionary::new().with("id", 1).with("name", "Ada"),
            RecordStatus::Persisted,
        )
    }

    #[test]
    fn set_validates_and_marks_dirty() {
        let record = persisted();
        assert!(!record.has_changes());

        record.set("name", "Grace").unwrap();
        assert_eq!(record.get("name"), Some(Value::from("Grace")));
        assert!(record.has_changes());

        let err = record.set("name", 5).unwrap_err();
        assert_eq!(err.validation_errors().map(ValidationErrors::len), Some(1));
        assert!(record.set("colour", "red").is_err());
    }

    #[test]
    fn apply_dictionary_is_all_or_nothing() {
        let record = persisted();
        let bad = RecordDictionary::new()
            .with("name", "Grace")
            .with("id", "one")
            .with("extra", 1);

        let err = record.apply_dictionary(&bad).unwrap_err();
        assert_eq!(err.validation_errors().map(ValidationErrors::len), Some(2));
        assert_eq!(record.get("name"), Some(Value::from("Ada")));
        assert!(!record.has_changes());

        record
            .apply_dictionary(&RecordDictionary::new().with("name", Value::Null))
            .unwrap();
        assert_eq!(record.get("name"), Some(Value::Null));
        assert_eq!(record.get("id"), Some(Value::Integer(1)));
    }

    #[test]
    fn deleted_records_reject_writes() {
        let record = persisted();
        record.mark_deleted();
        assert!(matches!(record.set("name", "x"), Err(CoreError::InvalidOperation { .. })));
        assert!(record.has_changes());
    }

    #[test]
    fn refresh_skips_dirty_records() {
        let record = persisted();
        record.set("name", "Local").unwrap();
        record.refresh(RecordDictionary::new().with("id", 1).with("name", "Remote"));
        assert_eq!(record.get("name"), Some(Value::from("Local")));

        record.restore(RecordDictionary::new().with("id", 1).with("name", "Remote"));
        assert!(!record.has_changes());
        record.refresh(RecordDictionary::new().with("id", 1).with("name", "Newer"));
        assert_eq!(record.get("name"), Some(Value::from("Newer")));
    }

    #[test]
    fn identity() {
        let a = persisted();
        let b = a.clone();
        let c = persisted();
        assert!(a.same_record(&b));
        assert!(!a.same_record(&c));
        assert!(format!("{a:?}").contains("Person"));
    }
}
