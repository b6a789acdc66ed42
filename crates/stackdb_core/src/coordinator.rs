//! The store coordinator.
//!
//! A [`Coordinator`] owns one open store file: the committed records, the
//! store metadata and the single writer that appends commits. It is shared by
//! every context of a stack and is safe to use from any thread.
//!
//! At most one coordinator exists per store path in a process. Opening a
//! path that is already open returns the existing coordinator.
//!
//! ## Durability
//!
//! Every commit is one frame appended to the log and synced before the
//! in-memory state changes, so a commit that returned `Ok` survives a crash.
//! Rewrites (compaction, relabelling, migration, reset) go through
//! write-temp-then-rename.

use crate::config::StoreOptions;
use crate::error::{CoreError, CoreResult, ValidationErrors};
use crate::predicate::{FetchRequest, Predicate};
use crate::schema::{EntityDescription, Schema};
use crate::store::format::{Change, Commit, Frame, MetaChange, StoreHeader};
use crate::store::log::{Location, StoreLog};
use crate::store::migration::{self, MigrationReport, MigrationStep};
use crate::store::state::{StoreState, StoredMatch};
use crate::types::ObjectId;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use stackdb_codec::{RecordDictionary, Value};
use stackdb_storage::StorageBackend;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// A change handed to [`Coordinator::commit`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingChange {
    /// Insert or overwrite a complete record.
    Put {
        entity: String,
        id: ObjectId,
        fields: RecordDictionary,
    },
    /// Remove a record.
    Delete { entity: String, id: ObjectId },
}

struct Writer {
    log: StoreLog,
    _lock: Option<File>,
}

/// Shared owner of one open store.
pub struct Coordinator {
    path: Option<PathBuf>,
    schema: Arc<Schema>,
    state: RwLock<StoreState>,
    writer: Mutex<Writer>,
    epoch: AtomicU64,
    created: AtomicBool,
    migration: Option<MigrationReport>,
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<Coordinator>>> {
    static OPEN_STORES: OnceLock<Mutex<HashMap<PathBuf, Weak<Coordinator>>>> = OnceLock::new();
    OPEN_STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Coordinator {
    /// Opens (or creates) the store file at `path`.
    ///
    /// If a coordinator for the same file is already open in this process it
    /// is returned instead of opening the file a second time.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StoreLocked`] if another process holds the store
    /// - [`CoreError::MigrationFailed`] if the stored schema cannot be mapped
    /// - [`CoreError::InvalidOperation`] if the store is already open with a
    ///   structurally different schema
    /// - storage, codec and format errors from reading the file
    pub fn open(schema: Schema, path: &Path, options: StoreOptions) -> CoreResult<Arc<Self>> {
        let path = canonical_store_path(path)?;
        let mut open = registry().lock();
        open.retain(|_, store| store.strong_count() > 0);

        if let Some(existing) = open.get(&path).and_then(Weak::upgrade) {
            if existing.schema.fingerprint() != schema.fingerprint() {
                return Err(CoreError::invalid_operation(format!(
                    "{} is already open with a different schema",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "reusing open store");
            return Ok(existing);
        }

        let lock = acquire_lock(&path)?;
        let (mut log, file_created) = StoreLog::open_file(&path, options.sync_on_commit)?;
        let loaded = load(&mut log, &schema, options)?;
        let created = file_created || loaded.initialized;
        if created {
            tracing::info!(path = %path.display(), version = schema.version(), "created store");
        } else {
            tracing::debug!(path = %path.display(), records = loaded.state.record_count(), "opened store");
        }

        let coordinator = Arc::new(Self {
            path: Some(path.clone()),
            schema: Arc::new(schema),
            state: RwLock::new(loaded.state),
            writer: Mutex::new(Writer { log, _lock: Some(lock) }),
            epoch: AtomicU64::new(0),
            created: AtomicBool::new(created),
            migration: loaded.report,
        });
        open.insert(path, Arc::downgrade(&coordinator));
        Ok(coordinator)
    }

    /// Opens a store over an arbitrary backend, outside the path registry.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus locking.
    pub fn with_backend(schema: Schema, backend: Box<dyn StorageBackend>, options: StoreOptions) -> CoreResult<Arc<Self>> {
        let mut log = StoreLog::with_backend(backend, options.sync_on_commit);
        let loaded = load(&mut log, &schema, options)?;
        Ok(Arc::new(Self {
            path: None,
            schema: Arc::new(schema),
            state: RwLock::new(loaded.state),
            writer: Mutex::new(Writer { log, _lock: None }),
            epoch: AtomicU64::new(0),
            created: AtomicBool::new(loaded.initialized),
            migration: loaded.report,
        }))
    }

    /// Canonical path of the store file, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The schema the store was opened with.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Incremented on every reset; contexts drop registered records when it
    /// changes.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns true once if opening created the store, false afterwards.
    pub fn take_created(&self) -> bool {
        self.created.swap(false, Ordering::AcqRel)
    }

    /// The migration applied on open, if any.
    #[must_use]
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.migration.as_ref()
    }

    /// Sequence number of the last commit.
    #[must_use]
    pub fn last_commit(&self) -> u64 {
        self.state.read().last_commit()
    }

    /// Total number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.read().record_count()
    }

    /// Record counts per entity; entities without records are listed as 0.
    #[must_use]
    pub fn entity_counts(&self) -> BTreeMap<String, usize> {
        let stored = self.state.read().entity_counts();
        self.schema
            .entity_names()
            .map(|name| (name.to_string(), stored.get(name).copied().unwrap_or(0)))
            .collect()
    }

    /// Size of the store file in bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the size cannot be read.
    pub fn file_size(&self) -> CoreResult<u64> {
        self.writer.lock().log.size()
    }

    pub(crate) fn entity(&self, name: &str) -> CoreResult<&Arc<EntityDescription>> {
        self.schema.entity(name).ok_or_else(|| CoreError::unknown_entity(name))
    }

    /// All matches of the request predicate, in store order, without sorting
    /// or windowing.
    pub(crate) fn fetch(&self, request: &FetchRequest) -> CoreResult<Vec<StoredMatch>> {
        let entity = self.entity(&request.entity)?;
        request.check_against(entity)?;
        Ok(self.state.read().matching(&request.entity, &request.predicate))
    }

    /// Runs a request directly against committed data.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] or [`CoreError::UnknownAttribute`]
    /// if the request does not fit the schema.
    pub fn fetch_dictionaries(&self, request: &FetchRequest) -> CoreResult<Vec<(ObjectId, RecordDictionary)>> {
        let mut matches = self.fetch(request)?;
        matches.sort_by(|a, b| request.order(&a.fields, a.seq, &b.fields, b.seq));
        Ok(request
            .window(matches)
            .into_iter()
            .map(|m| (m.id, m.fields))
            .collect())
    }

    /// Counts committed records matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] or [`CoreError::UnknownAttribute`].
    pub fn count(&self, entity: &str, predicate: &Predicate) -> CoreResult<usize> {
        predicate.check_against(self.entity(entity)?)?;
        Ok(self.state.read().count(entity, predicate))
    }

    /// Looks up a committed record: `(entity, insertion order, fields)`.
    pub(crate) fn lookup(&self, id: &ObjectId) -> Option<(String, u64, RecordDictionary)> {
        let state = self.state.read();
        state
            .lookup(id)
            .map(|(entity, r)| (entity.to_string(), r.seq, r.fields.clone()))
    }

    /// Validates and durably applies a set of changes as one commit.
    ///
    /// Every put is validated against the schema first and all problems are
    /// reported together; nothing is written unless every change is valid.
    pub(crate) fn commit(&self, changes: Vec<PendingChange>, metadata: Vec<MetaChange>) -> CoreResult<u64> {
        let mut writer = self.writer.lock();
        let commit = {
            let state = self.state.read();
            if changes.is_empty() && metadata.is_empty() {
                return Ok(state.last_commit());
            }
            let mut errors = ValidationErrors::new();
            let mut next_seq = state.next_seq();
            let mut out = Vec::with_capacity(changes.len());
            for change in changes {
                match change {
                    PendingChange::Put { entity, id, fields } => {
                        errors.merge(self.entity(&entity)?.validate(&fields, Some(id)));
                        let seq = match state.lookup(&id) {
                            Some((stored, _)) if stored != entity => {
                                return Err(CoreError::invalid_operation(format!(
                                    "object {id} is a {stored}, not a {entity}"
                                )));
                            }
                            Some((_, record)) => record.seq,
                            None => {
                                next_seq += 1;
                                next_seq - 1
                            }
                        };
                        out.push(Change::Put { entity, id, seq, fields });
                    }
                    PendingChange::Delete { entity, id } => {
                        if !state.contains(&id) {
                            tracing::debug!(%id, "deleting a record that is already gone");
                        }
                        out.push(Change::Delete { entity, id });
                    }
                }
            }
            errors.into_result()?;
            Commit {
                sequence: state.last_commit() + 1,
                changes: out,
                metadata,
            }
        };

        writer.log.append(&Frame::Commit(commit.clone()))?;
        self.state.write().apply(&commit);
        tracing::debug!(
            sequence = commit.sequence,
            changes = commit.changes.len(),
            metadata = commit.metadata.len(),
            "committed"
        );
        Ok(commit.sequence)
    }

    /// Reads one metadata entry.
    #[must_use]
    pub fn meta_value(&self, key: &str) -> Option<Value> {
        self.state.read().metadata().get(key).cloned()
    }

    /// Durably sets one metadata entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the commit cannot be written.
    pub fn set_meta_value(&self, key: &str, value: Value) -> CoreResult<()> {
        self.commit(
            Vec::new(),
            vec![MetaChange::Set {
                key: key.to_string(),
                value,
            }],
        )
        .map(drop)
    }

    /// Durably removes one metadata entry, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the commit cannot be written.
    pub fn remove_meta_value(&self, key: &str) -> CoreResult<bool> {
        if self.meta_value(key).is_none() {
            return Ok(false);
        }
        self.commit(Vec::new(), vec![MetaChange::Remove { key: key.to_string() }])?;
        Ok(true)
    }

    /// All metadata entries.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, Value> {
        self.state.read().metadata().clone()
    }

    /// Rewrites the log as a header plus one snapshot commit.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rewrite fails; the old file is kept.
    pub fn compact(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        let snapshot = self.state.read().snapshot();
        let before = writer.log.size()?;
        writer
            .log
            .rewrite(&[Frame::Header(StoreHeader::for_schema(&self.schema)), Frame::Commit(snapshot)])?;
        tracing::info!(path = %self.display_path().display(), before, after = writer.log.size()?, "compacted store");
        Ok(())
    }

    /// Erases every record and all metadata.
    ///
    /// The file is replaced by an empty store atomically. If that fails the
    /// previous contents stay in place and a [`CoreError::ResetFailed`] is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResetFailed`] wrapping the underlying error.
    pub fn reset(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        writer
            .log
            .rewrite(&[Frame::Header(StoreHeader::for_schema(&self.schema))])
            .map_err(|e| CoreError::reset_failed(self.display_path(), e))?;
        *self.state.write() = StoreState::new();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(path = %self.display_path().display(), epoch, "reset store");
        Ok(())
    }

    fn display_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("<backend>"))
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("path", &self.path)
            .field("schema_version", &self.schema.version())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

/// The coordinator a stack's contexts reach the store through.
///
/// Empty when the store never opened, in which case every operation fails
/// with [`CoreError::StoreUnavailable`].
pub(crate) struct StoreSlot {
    path: PathBuf,
    current: RwLock<Option<Arc<Coordinator>>>,
}

impl StoreSlot {
    pub fn new(path: PathBuf, coordinator: Option<Arc<Coordinator>>) -> Self {
        Self {
            path,
            current: RwLock::new(coordinator),
        }
    }

    pub fn get(&self) -> CoreResult<Arc<Coordinator>> {
        self.current.read().clone().ok_or_else(|| CoreError::StoreUnavailable {
            path: self.path.clone(),
        })
    }

    pub fn set(&self, coordinator: Option<Arc<Coordinator>>) {
        *self.current.write() = coordinator;
    }

    pub fn is_available(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for StoreSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSlot")
            .field("path", &self.path)
            .field("available", &self.is_available())
            .finish()
    }
}

struct Loaded {
    state: StoreState,
    report: Option<MigrationReport>,
    /// The log had no header and one was written.
    initialized: bool,
}

fn load(log: &mut StoreLog, schema: &Schema, options: StoreOptions) -> CoreResult<Loaded> {
    let replayed = log.replay()?;
    let Some(header) = replayed.header else {
        log.append(&Frame::Header(StoreHeader::for_schema(schema)))?;
        return Ok(Loaded {
            state: StoreState::new(),
            report: None,
            initialized: true,
        });
    };
    if header.computed_fingerprint() != header.fingerprint {
        return Err(CoreError::invalid_format("store header fingerprint does not match its entities"));
    }

    let mut state = StoreState::new();
    for commit in &replayed.commits {
        state.apply(commit);
    }

    let mut report = None;
    match migration::plan(&header, schema, options.migration)? {
        MigrationStep::None => {}
        MigrationStep::Relabel => {
            tracing::info!(from = %header.schema_version, to = schema.version(), "relabelling store");
            log.rewrite(&[Frame::Header(StoreHeader::for_schema(schema)), Frame::Commit(state.snapshot())])?;
        }
        MigrationStep::Infer => {
            let mapped = migration::infer(&header, &mut state, schema)?;
            tracing::info!(
                from = %header.schema_version,
                to = schema.version(),
                dropped_entities = ?mapped.dropped_entities,
                dropped_attributes = ?mapped.dropped_attributes,
                added_attributes = ?mapped.added_attributes,
                "migrated store"
            );
            log.rewrite(&[Frame::Header(StoreHeader::for_schema(schema)), Frame::Commit(state.snapshot())])?;
            report = Some(mapped);
        }
    }
    if matches!(log.location(), Location::File(_)) && replayed.truncated > 0 {
        tracing::warn!(dropped = replayed.truncated, "store recovered from an incomplete write");
    }

    Ok(Loaded {
        state,
        report,
        initialized: false,
    })
}

fn canonical_store_path(path: &Path) -> CoreResult<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| CoreError::invalid_operation(format!("store path {} has no file name", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    Ok(parent.canonicalize()?.join(name))
}

/// Path of the lock file guarding `store`.
#[must_use]
pub fn lock_path(store: &Path) -> PathBuf {
    let mut name = store.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    store.with_file_name(name)
}

fn acquire_lock(store: &Path) -> CoreResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(store))?;
    if file.try_lock_exclusive().is_err() {
        return Err(CoreError::StoreLocked {
            path: store.to_path_buf(),
        });
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationOptions;
    use stackdb_storage::InMemoryBackend;
    use tempfile::tempdir;

    const PEOPLE: &str = r#"{"version":"1","entities":[{"name":"Person","attributes":[
        {"name":"id","type":"integer"},
        {"name":"name","type":"text","optional":true}]}]}"#;

    fn schema() -> Schema {
        Schema::from_json_str(PEOPLE).unwrap()
    }

    fn put(id: ObjectId, n: i64) -> PendingChange {
        PendingChange::Put {
            entity: "Person".into(),
            id,
            fields: RecordDictionary::new().with("id", n),
        }
    }

    fn memory() -> (Arc<Coordinator>, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let c = Coordinator::with_backend(schema(), Box::new(backend.clone()), StoreOptions::default()).unwrap();
        (c, backend)
    }

    #[test]
    fn closed_stores_leave_the_registry() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.sdb");
        let c = Coordinator::open(schema(), &first, StoreOptions::default()).unwrap();
        let key = c.path().unwrap().to_path_buf();
        assert!(registry().lock().contains_key(&key));
        drop(c);

        let _other = Coordinator::open(schema(), &dir.path().join("second.sdb"), StoreOptions::default()).unwrap();
        assert!(!registry().lock().contains_key(&key));
    }

    #[test]
    fn commit_then_fetch_in_insertion_order() {
        let (c, _) = memory();
        let ids: Vec<ObjectId> = (0..3).map(|_| ObjectId::new()).collect();
        c.commit(ids.iter().enumerate().map(|(i, id)| put(*id, i as i64)).collect(), vec![])
            .unwrap();

        let found = c.fetch_dictionaries(&FetchRequest::new("Person")).unwrap();
        assert_eq!(found.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ids);
        assert_eq!(c.count("Person", &Predicate::ge("id", 1)).unwrap(), 2);
        assert_eq!(c.last_commit(), 1);
    }

    #[test]
    fn invalid_commit_writes_nothing() {
        let (c, backend) = memory();
        let before = backend.data().len();
        let err = c
            .commit(
                vec![
                    PendingChange::Put {
                        entity: "Person".into(),
                        id: ObjectId::new(),
                        fields: RecordDictionary::new().with("id", "x"),
                    },
                    PendingChange::Put {
                        entity: "Person".into(),
                        id: ObjectId::new(),
                        fields: RecordDictionary::new(),
                    },
                ],
                vec![],
            )
            .unwrap_err();

        assert_eq!(err.validation_errors().map(ValidationErrors::len), Some(2));
        assert_eq!(backend.data().len(), before);
        assert_eq!(c.record_count(), 0);
    }

    #[test]
    fn unknown_entity_and_attribute_are_rejected() {
        let (c, _) = memory();
        assert!(matches!(
            c.count("Ghost", &Predicate::All),
            Err(CoreError::UnknownEntity { .. })
        ));
        assert!(matches!(
            c.count("Person", &Predicate::eq("age", 1)),
            Err(CoreError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let (c, backend) = memory();
        backend.fail_writes(true);
        assert!(matches!(
            c.commit(vec![put(ObjectId::new(), 1)], vec![]),
            Err(CoreError::Storage(_))
        ));
        assert_eq!(c.record_count(), 0);
    }

    #[test]
    fn state_and_metadata_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.store");
        let id = ObjectId::new();
        {
            let c = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap();
            assert!(c.take_created());
            assert!(!c.take_created());
            c.commit(vec![put(id, 7)], vec![]).unwrap();
            c.set_meta_value("sync_token", Value::from("abc")).unwrap();
        }

        let c = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap();
        assert!(!c.take_created());
        assert_eq!(c.lookup(&id).map(|(_, _, f)| f), Some(RecordDictionary::new().with("id", 7)));
        assert_eq!(c.meta_value("sync_token"), Some(Value::from("abc")));
    }

    #[test]
    fn same_path_shares_one_coordinator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.store");
        let a = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap();
        let b = Coordinator::open(schema(), &dir.path().join(".").join("shared.store"), StoreOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = Schema::from_json_str(r#"{"entities":[{"name":"X","attributes":[]}]}"#).unwrap();
        assert!(Coordinator::open(other, &path, StoreOptions::default()).is_err());
    }

    #[test]
    fn held_lock_reports_store_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.store");
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(&dir.path().canonicalize().unwrap().join("locked.store")))
            .unwrap();
        holder.lock_exclusive().unwrap();

        let err = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::StoreLocked { .. }));
    }

    #[test]
    fn metadata_set_remove() {
        let (c, _) = memory();
        c.set_meta_value("a", Value::Integer(1)).unwrap();
        c.set_meta_value("a", Value::Integer(2)).unwrap();
        assert_eq!(c.meta_value("a"), Some(Value::Integer(2)));
        assert!(c.remove_meta_value("a").unwrap());
        assert!(!c.remove_meta_value("a").unwrap());
        assert!(c.metadata().is_empty());
    }

    #[test]
    fn reset_clears_everything_and_bumps_epoch() {
        let (c, backend) = memory();
        c.commit(vec![put(ObjectId::new(), 1)], vec![MetaChange::Set { key: "k".into(), value: Value::Bool(true) }])
            .unwrap();

        c.reset().unwrap();

        assert_eq!(c.epoch(), 1);
        assert_eq!(c.record_count(), 0);
        assert!(c.meta_value("k").is_none());
        let reopened = Coordinator::with_backend(schema(), Box::new(backend), StoreOptions::default()).unwrap();
        assert_eq!(reopened.record_count(), 0);
    }

    #[test]
    fn failed_reset_keeps_previous_state() {
        let (c, backend) = memory();
        c.commit(vec![put(ObjectId::new(), 1)], vec![]).unwrap();
        backend.fail_writes(true);

        let err = c.reset().unwrap_err();

        assert!(matches!(err, CoreError::ResetFailed { .. }));
        assert_eq!(c.record_count(), 1);
        assert_eq!(c.epoch(), 0);
    }

    #[test]
    fn compact_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compact.store");
        let id = ObjectId::new();
        {
            let c = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap();
            for n in 0..20 {
                c.commit(vec![put(id, n)], vec![]).unwrap();
            }
            let before = c.file_size().unwrap();
            c.compact().unwrap();
            assert!(c.file_size().unwrap() < before);
            c.commit(vec![put(ObjectId::new(), 100)], vec![]).unwrap();
        }
        let c = Coordinator::open(schema(), &path, StoreOptions::default()).unwrap();
        assert_eq!(c.record_count(), 2);
        assert_eq!(c.lookup(&id).map(|(_, _, f)| f), Some(RecordDictionary::new().with("id", 19)));
    }

    #[test]
    fn schema_change_migrates_or_fails_by_options() {
        let backend = InMemoryBackend::new();
        let id = ObjectId::new();
        {
            let c = Coordinator::with_backend(schema(), Box::new(backend.clone()), StoreOptions::default()).unwrap();
            c.commit(vec![put(id, 1)], vec![]).unwrap();
        }
        let v2 = Schema::from_json_str(
            r#"{"version":"2","entities":[{"name":"Person","attributes":[
                {"name":"id","type":"integer"},
                {"name":"email","type":"text","optional":true}]}]}"#,
        )
        .unwrap();

        let strict = StoreOptions {
            migration: MigrationOptions::STRICT,
            sync_on_commit: true,
        };
        assert!(matches!(
            Coordinator::with_backend(v2.clone(), Box::new(backend.clone()), strict),
            Err(CoreError::MigrationFailed { .. })
        ));

        let c = Coordinator::with_backend(v2.clone(), Box::new(backend.clone()), StoreOptions::default()).unwrap();
        let report = c.migration_report().unwrap();
        assert_eq!(report.dropped_attributes, ["Person.name"]);
        assert_eq!(report.added_attributes, ["Person.email"]);
        assert_eq!(
            c.lookup(&id).map(|(_, _, f)| f),
            Some(RecordDictionary::new().with("id", 1).with("email", Value::Null))
        );
        drop(c);

        let again = Coordinator::with_backend(v2, Box::new(backend), strict).unwrap();
        assert!(again.migration_report().is_none());
    }

    #[test]
    fn replaced_entity_type_is_rejected() {
        let (c, _) = memory();
        let id = ObjectId::new();
        c.commit(vec![put(id, 1)], vec![]).unwrap();
        let err = c
            .commit(
                vec![PendingChange::Put {
                    entity: "Ghost".into(),
                    id,
                    fields: RecordDictionary::new(),
                }],
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntity { .. }));
    }
}
