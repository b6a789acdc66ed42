//! The per-context unit of work.
//!
//! A [`Session`] is what runs inside a context: it registers the records the
//! context has reached, tracks their unsaved changes and commits them on
//! [`save`](Session::save). Each context has exactly one session, living on
//! the context's thread; like [`Record`] it is neither `Send` nor `Sync`.
//!
//! Sessions of different contexts share nothing but the coordinator. Changes
//! in one become visible to another only after a save, and registered
//! records pick up committed values on the next fetch unless they carry
//! unsaved changes of their own.

use crate::coordinator::{Coordinator, PendingChange, StoreSlot};
use crate::error::{CoreError, CoreResult};
use crate::predicate::{FetchRequest, Predicate, ResultType};
use crate::query::FindResult;
use crate::record::{Record, RecordStatus};
use crate::schema::EntityDescription;
use crate::types::{ContextId, ContextKind, ObjectId};
use stackdb_codec::RecordDictionary;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Insertion order handed to unsaved records, after every committed one.
const PENDING_SEQ_BASE: u64 = u64::MAX / 2;

/// The unit of work of one context.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    id: ContextId,
    kind: ContextKind,
    store: Arc<StoreSlot>,
    registry: RefCell<HashMap<ObjectId, Record>>,
    next_pending: Cell<u64>,
    /// Coordinator identity and epoch the registry was built against.
    generation: Cell<Option<(usize, u64)>>,
    user_info: RefCell<Option<Box<dyn Any>>>,
}

struct Candidate {
    id: ObjectId,
    seq: u64,
    fields: RecordDictionary,
    record: Option<Record>,
}

impl Session {
    pub(crate) fn new(id: ContextId, kind: ContextKind, store: Arc<StoreSlot>) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                id,
                kind,
                store,
                registry: RefCell::new(HashMap::new()),
                next_pending: Cell::new(PENDING_SEQ_BASE),
                generation: Cell::new(None),
                user_info: RefCell::new(None),
            }),
        }
    }

    /// The owning context.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner.id
    }

    /// Kind of the owning context.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// Returns the coordinator, discarding registered records if the store
    /// was reset or replaced since they were registered.
    fn coordinator(&self) -> CoreResult<Arc<Coordinator>> {
        let coordinator = self.inner.store.get()?;
        let generation = (Arc::as_ptr(&coordinator) as usize, coordinator.epoch());
        match self.inner.generation.get() {
            Some(g) if g == generation => {}
            previous => {
                if previous.is_some() {
                    let discarded = self.inner.registry.borrow_mut().drain().count();
                    tracing::debug!(context = %self.inner.id, discarded, "store was reset, dropping registered records");
                }
                self.inner.generation.set(Some(generation));
            }
        }
        Ok(coordinator)
    }

    /// Description of `entity` in the open store's schema.
    pub(crate) fn entity_description(&self, entity: &str) -> CoreResult<Arc<EntityDescription>> {
        Ok(Arc::clone(self.coordinator()?.entity(entity)?))
    }

    fn register(&self, record: &Record) {
        self.inner.registry.borrow_mut().insert(record.id(), record.clone());
    }

    fn unregister(&self, id: &ObjectId) {
        self.inner.registry.borrow_mut().remove(id);
    }

    /// Committed matches merged with this session's unsaved changes, sorted
    /// and windowed.
    fn candidates(&self, request: &FetchRequest) -> CoreResult<Vec<Candidate>> {
        let coordinator = self.coordinator()?;
        let stored = coordinator
            .fetch(request)
            .map_err(|e| CoreError::fetch_failed(&request.entity, e))?;

        let registry = self.inner.registry.borrow();
        let mut out = Vec::with_capacity(stored.len());
        for m in stored {
            match registry.get(&m.id) {
                Some(r) if r.has_changes() => {}
                Some(r) => {
                    r.refresh(m.fields.clone());
                    out.push(Candidate {
                        id: m.id,
                        seq: m.seq,
                        fields: m.fields,
                        record: Some(r.clone()),
                    });
                }
                None => out.push(Candidate {
                    id: m.id,
                    seq: m.seq,
                    fields: m.fields,
                    record: None,
                }),
            }
        }
        for r in registry.values() {
            if r.entity() != request.entity || r.is_deleted() || !r.has_changes() {
                continue;
            }
            let fields = r.dictionary();
            if request.predicate.matches(&fields) {
                out.push(Candidate {
                    id: r.id(),
                    seq: r.seq(),
                    fields,
                    record: Some(r.clone()),
                });
            }
        }
        drop(registry);

        out.sort_by(|a, b| request.order(&a.fields, a.seq, &b.fields, b.seq));
        Ok(request.window(out))
    }

    /// Fetches records, registering any not seen before.
    ///
    /// Results include this session's unsaved inserts and edits and exclude
    /// its unsaved deletes. A record already registered is returned as the
    /// same instance.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FetchFailed`] if the store rejects the request,
    /// or [`CoreError::StoreUnavailable`].
    pub fn fetch(&self, request: &FetchRequest) -> CoreResult<Vec<Record>> {
        let candidates = self.candidates(request)?;
        let coordinator = self.coordinator()?;
        let entity = coordinator
            .entity(&request.entity)
            .map_err(|e| CoreError::fetch_failed(&request.entity, e))?;

        let records: Vec<Record> = candidates
            .into_iter()
            .map(|c| {
                c.record.unwrap_or_else(|| {
                    let record = Record::new(
                        c.id,
                        self.inner.id,
                        Arc::clone(entity),
                        c.seq,
                        c.fields,
                        RecordStatus::Persisted,
                    );
                    self.register(&record);
                    record
                })
            })
            .collect();
        tracing::debug!(context = %self.inner.id, entity = %request.entity, found = records.len(), "fetched");
        Ok(records)
    }

    /// Fetches detached dictionaries without registering records.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn fetch_dictionaries(&self, request: &FetchRequest) -> CoreResult<Vec<RecordDictionary>> {
        let dicts: Vec<RecordDictionary> = self.candidates(request)?.into_iter().map(|c| c.fields).collect();
        tracing::debug!(context = %self.inner.id, entity = %request.entity, found = dicts.len(), "fetched dictionaries");
        Ok(dicts)
    }

    /// Runs `request`, honouring its result type.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn find(&self, request: &FetchRequest) -> CoreResult<FindResult> {
        match request.result_type {
            ResultType::Records => self.fetch(request).map(FindResult::Records),
            ResultType::Dictionaries => self.fetch_dictionaries(request).map(FindResult::Dictionaries),
        }
    }

    /// Counts records of `entity` matching `predicate`, as a fetch would
    /// return them.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn count(&self, entity: &str, predicate: &Predicate) -> CoreResult<usize> {
        let pending = self
            .inner
            .registry
            .borrow()
            .values()
            .any(|r| r.entity() == entity && r.has_changes());
        if pending {
            let request = FetchRequest::new(entity).predicate(predicate.clone());
            return Ok(self.candidates(&request)?.len());
        }
        self.coordinator()?
            .count(entity, predicate)
            .map_err(|e| CoreError::fetch_failed(entity, e))
    }

    /// Looks up a record by identity.
    ///
    /// Returns `None` if no such record exists or it was deleted in this
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`].
    pub fn object(&self, id: ObjectId) -> CoreResult<Option<Record>> {
        let coordinator = self.coordinator()?;
        if let Some(r) = self.inner.registry.borrow().get(&id) {
            return Ok((!r.is_deleted()).then(|| r.clone()));
        }
        let Some((entity, seq, fields)) = coordinator.lookup(&id) else {
            return Ok(None);
        };
        let record = Record::new(
            id,
            self.inner.id,
            Arc::clone(coordinator.entity(&entity)?),
            seq,
            fields,
            RecordStatus::Persisted,
        );
        self.register(&record);
        Ok(Some(record))
    }

    /// Creates a new record of `entity` with every attribute `Null`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] or [`CoreError::StoreUnavailable`].
    pub fn insert(&self, entity: &str) -> CoreResult<Record> {
        let coordinator = self.coordinator()?;
        let description = Arc::clone(coordinator.entity(entity)?);
        let seq = self.inner.next_pending.get();
        self.inner.next_pending.set(seq + 1);

        let record = Record::new(
            ObjectId::new(),
            self.inner.id,
            Arc::clone(&description),
            seq,
            description.blank_dictionary(),
            RecordStatus::Inserted,
        );
        self.register(&record);
        Ok(record)
    }

    /// Creates a new record of `entity` populated from `dict`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationFailed`] with every problem in `dict`,
    /// in which case nothing is inserted.
    pub fn insert_with_dictionary(&self, entity: &str, dict: &RecordDictionary) -> CoreResult<Record> {
        let record = self.insert(entity)?;
        if let Err(e) = record.apply_dictionary(dict) {
            self.unregister(&record.id());
            record.mark_deleted();
            return Err(e);
        }
        Ok(record)
    }

    /// Deletes a record. An unsaved insert is simply discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the record belongs to a
    /// different context.
    pub fn delete(&self, record: &Record) -> CoreResult<()> {
        if record.context_id() != self.inner.id {
            return Err(CoreError::invalid_operation(format!(
                "record {} belongs to {}, not {}",
                record.id(),
                record.context_id(),
                self.inner.id
            )));
        }
        if record.is_inserted() {
            self.unregister(&record.id());
        } else {
            self.register(record);
        }
        record.mark_deleted();
        Ok(())
    }

    /// Returns true if [`save`](Self::save) would write anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.inner.registry.borrow().values().any(Record::has_changes)
    }

    /// Number of registered records.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Commits every unsaved insert, edit and delete as one commit.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] on a sandbox context
    /// - [`CoreError::ValidationFailed`] listing every invalid record; nothing
    ///   is written in that case
    /// - storage errors from appending the commit
    pub fn save(&self) -> CoreResult<()> {
        if self.inner.kind == ContextKind::Sandbox {
            return Err(CoreError::invalid_operation("sandbox contexts are never saved"));
        }
        let coordinator = self.coordinator()?;

        let mut touched: Vec<Record> = self
            .inner
            .registry
            .borrow()
            .values()
            .filter(|r| r.has_changes())
            .cloned()
            .collect();
        if touched.is_empty() {
            return Ok(());
        }
        touched.sort_by_key(Record::seq);

        let changes = touched
            .iter()
            .map(|r| match r.status() {
                RecordStatus::Deleted => PendingChange::Delete {
                    entity: r.entity().to_string(),
                    id: r.id(),
                },
                RecordStatus::Inserted | RecordStatus::Persisted => PendingChange::Put {
                    entity: r.entity().to_string(),
                    id: r.id(),
                    fields: r.dictionary(),
                },
            })
            .collect();
        let sequence = coordinator.commit(changes, Vec::new())?;

        let mut registry = self.inner.registry.borrow_mut();
        for r in &touched {
            if r.is_deleted() {
                registry.remove(&r.id());
            } else {
                let seq = coordinator.lookup(&r.id()).map_or(r.seq(), |(_, seq, _)| seq);
                r.mark_saved(seq);
            }
        }
        tracing::debug!(context = %self.inner.id, sequence, records = touched.len(), "saved");
        Ok(())
    }

    /// Discards every unsaved change.
    ///
    /// Unsaved inserts are dropped, deletes are undone and edits revert to
    /// the committed values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`].
    pub fn rollback(&self) -> CoreResult<()> {
        let coordinator = self.coordinator()?;
        let mut registry = self.inner.registry.borrow_mut();
        registry.retain(|id, r| {
            if !r.has_changes() {
                return true;
            }
            if r.is_inserted() {
                r.mark_deleted();
                return false;
            }
            match coordinator.lookup(id) {
                Some((_, _, fields)) => {
                    r.restore(fields);
                    true
                }
                None => {
                    r.mark_deleted();
                    false
                }
            }
        });
        Ok(())
    }

    /// Forgets every registered record, saved or not.
    pub fn reset(&self) {
        self.inner.registry.borrow_mut().clear();
    }

    /// Attaches user info to a sandbox context, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on other context kinds.
    pub fn set_user_info<T: Any>(&self, info: T) -> CoreResult<()> {
        if self.inner.kind != ContextKind::Sandbox {
            return Err(CoreError::invalid_operation(format!(
                "user info is only available on sandbox contexts, not {}",
                self.inner.kind
            )));
        }
        *self.inner.user_info.borrow_mut() = Some(Box::new(info));
        Ok(())
    }

    /// A copy of the attached user info, if it is a `T`.
    #[must_use]
    pub fn user_info<T: Any + Clone>(&self) -> Option<T> {
        self.inner
            .user_info
            .borrow()
            .as_ref()
            .and_then(|info| info.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the attached user info, if it is a `T`.
    pub fn take_user_info<T: Any>(&self) -> Option<T> {
        let mut slot = self.inner.user_info.borrow_mut();
        match slot.take()?.downcast::<T>() {
            Ok(info) => Some(*info),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    /// Returns true if user info is attached.
    #[must_use]
    pub fn has_user_info(&self) -> bool {
        self.inner.user_info.borrow().is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("registered", &self.registered_count())
            .finish_non_exhaustive()
    }
}
