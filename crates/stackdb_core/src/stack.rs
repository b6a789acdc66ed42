//! The stack: one configured store and the contexts that reach it.
//!
//! Building a [`Stack`] never fails. If the store cannot be opened the
//! configured `on_open_failed` callback runs, the error is logged and kept,
//! and every store-touching operation through the stack fails fast with
//! [`CoreError::StoreUnavailable`] until a [`reset_stack`](Stack::reset_stack)
//! manages to open a fresh store.
//!
//! ```ignore
//! let config = StoreConfiguration::new(["model.json"], "app.sdb").base_dir(dir);
//! let stack = Stack::new(config);
//!
//! let main = stack.main_context();
//! let n = main.perform_and_wait(|s| s.count("Person", &Predicate::All))?;
//! ```

use crate::config::StoreConfiguration;
use crate::context::Context;
use crate::coordinator::{Coordinator, StoreSlot};
use crate::error::{CoreError, CoreResult};
use crate::metadata::MetadataStore;
use crate::predicate::{FetchRequest, Predicate};
use crate::query::{self, FindResult};
use crate::schema::Schema;
use crate::types::ContextKind;
use parking_lot::Mutex;
use stackdb_codec::Value;
use stackdb_storage::InMemoryBackend;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

const MEMORY_PATH: &str = "<memory>";

/// A configured store with its context factory.
///
/// Cloning is cheap and every clone is the same stack.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

struct StackInner {
    config: Option<StoreConfiguration>,
    slot: Arc<StoreSlot>,
    owner: ThreadId,
    main: OnceLock<Context>,
    /// Message of the last failed open, cleared by a successful one.
    open_error: Mutex<Option<String>>,
    resetting: Mutex<()>,
}

impl Stack {
    /// Builds a stack and opens its store.
    ///
    /// The calling thread becomes the owner of the main context.
    #[must_use]
    pub fn new(config: StoreConfiguration) -> Self {
        let stack = Self::from_parts(Some(config), None);
        if let Some(config) = &stack.inner.config {
            // Failures are routed to the callback and recorded.
            let _ = stack.attach(config);
        }
        stack
    }

    /// Builds a stack over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty store cannot be initialized.
    pub fn in_memory(schema: Schema) -> CoreResult<Self> {
        let coordinator = Coordinator::with_backend(schema, Box::new(InMemoryBackend::new()), Default::default())?;
        coordinator.take_created();
        Ok(Self::from_parts(None, Some(coordinator)))
    }

    /// Builds a stack from the global [`settings`](crate::default_stack::settings),
    /// installing it as the default stack if there is none yet.
    pub fn with_model_filenames<I, P>(schema_files: I, db_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let stack = Self::new(crate::default_stack::settings::configuration_for(schema_files, db_name));
        crate::default_stack::install_if_absent(&stack);
        stack
    }

    fn from_parts(config: Option<StoreConfiguration>, coordinator: Option<Arc<Coordinator>>) -> Self {
        let path = config
            .as_ref()
            .map_or_else(|| PathBuf::from(MEMORY_PATH), StoreConfiguration::store_path);
        Self {
            inner: Arc::new(StackInner {
                config,
                slot: Arc::new(StoreSlot::new(path, coordinator)),
                owner: thread::current().id(),
                main: OnceLock::new(),
                open_error: Mutex::new(None),
                resetting: Mutex::new(()),
            }),
        }
    }

    /// Opens the configured store into the slot, firing the lifecycle
    /// callbacks.
    fn attach(&self, config: &StoreConfiguration) -> CoreResult<()> {
        let opened = Schema::load(config.schema_files())
            .map_err(CoreError::from)
            .and_then(|schema| Coordinator::open(schema, &config.store_path(), config.store_options()));
        match opened {
            Ok(coordinator) => {
                self.install(config, coordinator);
                Ok(())
            }
            Err(e) => Err(self.record_open_failure(config, e)),
        }
    }

    fn install(&self, config: &StoreConfiguration, coordinator: Arc<Coordinator>) {
        let created = coordinator.take_created();
        self.inner.slot.set(Some(coordinator));
        *self.inner.open_error.lock() = None;
        if created {
            if let Some(callback) = config.store_created_callback() {
                callback(&config.store_path());
            }
        }
    }

    fn record_open_failure(&self, config: &StoreConfiguration, error: CoreError) -> CoreError {
        let path = config.store_path();
        tracing::error!(path = %path.display(), error = %error, "failed to open store");
        self.inner.slot.set(None);
        *self.inner.open_error.lock() = Some(error.to_string());
        if let Some(callback) = config.open_failed_callback() {
            callback(&path);
        }
        error
    }

    /// The configuration the stack was built from; `None` for in-memory stacks.
    #[must_use]
    pub fn configuration(&self) -> Option<&StoreConfiguration> {
        self.inner.config.as_ref()
    }

    /// Path of the store file.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        self.inner.slot.path()
    }

    /// Returns true if the store is open.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.slot.is_available()
    }

    /// Why the store is not open, if it failed to open.
    #[must_use]
    pub fn open_error(&self) -> Option<String> {
        self.inner.open_error.lock().clone()
    }

    /// The thread that owns the main context.
    #[must_use]
    pub fn owner_thread(&self) -> ThreadId {
        self.inner.owner
    }

    /// The open coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the store is not open.
    pub fn coordinator(&self) -> CoreResult<Arc<Coordinator>> {
        self.inner.slot.get()
    }

    /// The long-lived context of the owning thread.
    ///
    /// Created on first call; every later call returns the same context.
    #[must_use]
    pub fn main_context(&self) -> Context {
        self.inner
            .main
            .get_or_init(|| Context::main(Arc::clone(&self.inner.slot), self.inner.owner))
            .clone()
    }

    /// A new context with its own worker thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the worker thread cannot be spawned.
    pub fn background_context(&self) -> CoreResult<Context> {
        Context::spawn(ContextKind::Background, Arc::clone(&self.inner.slot))
    }

    /// A new context that can carry user info and is never saved.
    ///
    /// # Errors
    ///
    /// Same as [`background_context`](Self::background_context).
    pub fn sandbox_context(&self) -> CoreResult<Context> {
        Context::spawn(ContextKind::Sandbox, Arc::clone(&self.inner.slot))
    }

    /// Counts on `context`, or on a fresh background context.
    ///
    /// # Errors
    ///
    /// See [`query::count`]; also fails if a background context cannot be
    /// created.
    pub fn count<F>(&self, context: Option<&Context>, entity: impl Into<String>, predicate: Predicate, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<usize>) + Send + 'static,
    {
        match context {
            Some(context) => query::count(context, entity, predicate, callback),
            None => query::count(&self.background_context()?, entity, predicate, callback),
        }
    }

    /// Runs a fetch on `context`, or on a fresh background context.
    ///
    /// # Errors
    ///
    /// Same as [`count`](Self::count).
    pub fn find<F>(&self, context: Option<&Context>, request: FetchRequest, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<FindResult>) + Send + 'static,
    {
        match context {
            Some(context) => query::find(context, request, callback),
            None => query::find(&self.background_context()?, request, callback),
        }
    }

    /// The stack's metadata accessor.
    #[must_use]
    pub fn metadata(&self) -> MetadataStore {
        MetadataStore::new(Arc::clone(&self.inner.slot))
    }

    /// Shorthand for [`MetadataStore::set_meta_value`].
    ///
    /// # Errors
    ///
    /// See [`MetadataStore::set_meta_value`].
    pub fn set_meta_value(&self, value: impl Into<Value>, key: &str) -> CoreResult<()> {
        self.metadata().set_meta_value(value, key)
    }

    /// Shorthand for [`MetadataStore::meta_value_for_key`].
    ///
    /// # Errors
    ///
    /// See [`MetadataStore::meta_value_for_key`].
    pub fn meta_value_for_key(&self, key: &str) -> CoreResult<Option<Value>> {
        self.metadata().meta_value_for_key(key)
    }

    /// Replaces the store with an empty one.
    ///
    /// Records and metadata are erased and every context drops the records
    /// it had registered. If the store never opened, opening is retried; a
    /// file that still cannot be opened is set aside and replaced by a fresh
    /// store, and put back if the fresh store cannot be opened either.
    ///
    /// A file held by another process, or open in this process with a
    /// different schema, is never replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResetFailed`]; the store file is left as it was.
    pub fn reset_stack(&self) -> CoreResult<()> {
        let _resetting = self.inner.resetting.lock();
        if let Ok(coordinator) = self.inner.slot.get() {
            return coordinator.reset();
        }

        let path = self.inner.slot.path().to_path_buf();
        let Some(config) = &self.inner.config else {
            return Err(CoreError::reset_failed(
                &path,
                CoreError::StoreUnavailable { path: path.clone() },
            ));
        };
        let schema = Schema::load(config.schema_files()).map_err(|e| CoreError::reset_failed(&path, e.into()))?;

        match Coordinator::open(schema.clone(), &path, config.store_options()) {
            Ok(coordinator) => {
                coordinator.reset()?;
                self.install(config, coordinator);
                tracing::info!(path = %path.display(), "store opened by reset");
                return Ok(());
            }
            // The file belongs to a live store; it must not be replaced.
            Err(e @ (CoreError::StoreLocked { .. } | CoreError::InvalidOperation { .. })) => {
                return Err(CoreError::reset_failed(&path, e));
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "replacing unopenable store"),
        }

        let backup = backup_path(&path);
        let moved = match fs::rename(&path, &backup) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(CoreError::reset_failed(&path, e.into())),
        };

        match Coordinator::open(schema, &path, config.store_options()) {
            Ok(coordinator) => {
                self.install(config, coordinator);
                if moved {
                    if let Err(e) = fs::remove_file(&backup) {
                        tracing::warn!(path = %backup.display(), error = %e, "could not remove replaced store");
                    }
                }
                tracing::info!(path = %path.display(), "store replaced by reset");
                Ok(())
            }
            Err(e) => {
                let error = self.record_open_failure(config, e);
                if moved {
                    if let Err(e) = restore_backup(&backup, &path) {
                        tracing::error!(path = %path.display(), error = %e, "could not restore store after failed reset");
                    }
                }
                Err(CoreError::reset_failed(&path, error))
            }
        }
    }

    /// Returns true if both handles are the same stack.
    #[must_use]
    pub fn same_stack(&self, other: &Stack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Sibling the old file is moved to while a reset replaces it.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".reset");
    path.with_file_name(name)
}

fn restore_backup(backup: &Path, path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(backup, path)
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("path", &self.store_path())
            .field("available", &self.is_available())
            .field("owner", &self.inner.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdb_codec::RecordDictionary;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use tempfile::TempDir;

    const MODEL: &str = r#"{"version":"1","entities":[{"name":"Note","attributes":[
        {"name":"title","type":"text"}]}]}"#;

    fn model(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("model.json");
        fs::write(&path, MODEL).unwrap();
        path
    }

    fn note(title: &str) -> RecordDictionary {
        RecordDictionary::new().with("title", title)
    }

    #[test]
    fn main_context_is_cached() {
        let stack = Stack::in_memory(Schema::from_json_str(MODEL).unwrap()).unwrap();
        let a = stack.main_context();
        let b = stack.main_context();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.kind(), ContextKind::Main);
        assert_ne!(stack.background_context().unwrap().id(), stack.background_context().unwrap().id());
    }

    #[test]
    fn count_defaults_to_a_background_context() {
        let stack = Stack::in_memory(Schema::from_json_str(MODEL).unwrap()).unwrap();
        stack
            .main_context()
            .perform_and_wait(|s| {
                s.insert_with_dictionary("Note", &note("a"))?;
                s.save()
            })
            .unwrap();

        let (tx, rx) = mpsc::channel();
        stack
            .count(None, "Note", Predicate::All, move |n| tx.send(n.map_err(|e| e.to_string())).unwrap())
            .unwrap();
        assert_eq!(rx.recv().unwrap(), Ok(1));

        let (tx, rx) = mpsc::channel();
        stack
            .find(None, FetchRequest::new("Note").dictionaries(), move |found| {
                tx.send(found.map(FindResult::into_dictionaries).map_err(|e| e.to_string()))
                    .unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap().unwrap(), vec![note("a")]);
    }

    #[test]
    fn callbacks_fire_once_per_creation() {
        let dir = TempDir::new().unwrap();
        let created = Arc::new(AtomicUsize::new(0));
        let config = {
            let created = Arc::clone(&created);
            StoreConfiguration::new([model(&dir)], "notes.sdb")
                .base_dir(dir.path())
                .on_store_created(move |_| {
                    created.fetch_add(1, Ordering::SeqCst);
                })
        };

        let first = Stack::new(config.clone());
        let second = Stack::new(config);
        assert!(first.is_available() && second.is_available());
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.coordinator().unwrap(), &second.coordinator().unwrap()));
    }

    #[test]
    fn failed_open_routes_to_callback() {
        let dir = TempDir::new().unwrap();
        let failed = Arc::new(Mutex::new(None::<PathBuf>));
        let config = {
            let failed = Arc::clone(&failed);
            StoreConfiguration::new([dir.path().join("missing.json")], "notes.sdb")
                .base_dir(dir.path())
                .on_open_failed(move |path| *failed.lock() = Some(path.to_path_buf()))
        };

        let stack = Stack::new(config);
        assert!(!stack.is_available());
        assert!(stack.open_error().is_some());
        assert_eq!(failed.lock().as_deref(), Some(dir.path().join("notes.sdb").as_path()));

        let err = stack
            .main_context()
            .perform_and_wait(|s| s.count("Note", &Predicate::All))
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(stack.set_meta_value(1, "k").unwrap_err().is_store_unavailable());
    }

    #[test]
    fn reset_recovers_an_unopenable_store() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let store = dir.path().join("notes.sdb");
        fs::write(&store, b"definitely not a store").unwrap();

        let stack = Stack::new(StoreConfiguration::new([model], "notes.sdb").base_dir(dir.path()));
        assert!(!stack.is_available());

        stack.reset_stack().unwrap();
        assert!(stack.is_available());
        assert!(!backup_path(&store).exists());
        assert_eq!(stack.meta_value_for_key("anything").unwrap(), None);
    }

    #[test]
    fn reset_erases_records_and_metadata() {
        let stack = Stack::in_memory(Schema::from_json_str(MODEL).unwrap()).unwrap();
        let main = stack.main_context();
        main.perform_and_wait(|s| {
            s.insert_with_dictionary("Note", &note("a"))?;
            s.save()
        })
        .unwrap();
        stack.set_meta_value("v1", "schema").unwrap();

        stack.reset_stack().unwrap();
        assert_eq!(stack.meta_value_for_key("schema").unwrap(), None);
        let session = main.session().unwrap();
        assert!(session.fetch(&FetchRequest::new("Note")).unwrap().is_empty());
        assert_eq!(session.registered_count(), 0);
    }
}
