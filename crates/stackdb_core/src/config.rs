//! Store configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback invoked with the store path.
pub type StoreCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Name of the directory stores live in under the platform data directory.
pub const DATA_DIR_NAME: &str = "stackdb";

/// How an existing store may be brought up to date with the current schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Allow opening a store written with a different schema.
    pub auto_migrate_stores: bool,
    /// Derive the mapping from the stored schema to the current one.
    pub auto_infer_mapping: bool,
    /// Ignore schema version labels when the structure is unchanged.
    pub ignore_store_versioning: bool,
}

impl MigrationOptions {
    /// All migration behaviours enabled.
    pub const TRIVIAL: Self = Self {
        auto_migrate_stores: true,
        auto_infer_mapping: true,
        ignore_store_versioning: true,
    };

    /// No migration at all: the stored schema must match exactly.
    pub const STRICT: Self = Self {
        auto_migrate_stores: false,
        auto_infer_mapping: false,
        ignore_store_versioning: false,
    };

    /// Sets whether stores may be migrated.
    #[must_use]
    pub const fn auto_migrate_stores(mut self, value: bool) -> Self {
        self.auto_migrate_stores = value;
        self
    }

    /// Sets whether the mapping may be inferred.
    #[must_use]
    pub const fn auto_infer_mapping(mut self, value: bool) -> Self {
        self.auto_infer_mapping = value;
        self
    }

    /// Sets whether version labels are ignored.
    #[must_use]
    pub const fn ignore_store_versioning(mut self, value: bool) -> Self {
        self.ignore_store_versioning = value;
        self
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::TRIVIAL
    }
}

/// Options the coordinator needs once the path is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Migration behaviour.
    pub migration: MigrationOptions,
    /// Whether to fsync after every commit.
    pub sync_on_commit: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            migration: MigrationOptions::TRIVIAL,
            sync_on_commit: true,
        }
    }
}

/// Configuration of one stack.
///
/// A configuration is fixed once the stack is built from it. The store lives
/// at `base_dir/db_name`, with a lock file next to it.
#[derive(Clone)]
pub struct StoreConfiguration {
    schema_files: Vec<PathBuf>,
    db_name: String,
    base_dir: PathBuf,
    migration: MigrationOptions,
    sync_on_commit: bool,
    on_store_created: Option<StoreCallback>,
    on_open_failed: Option<StoreCallback>,
}

impl StoreConfiguration {
    /// Creates a configuration for `db_name` built from the given schema
    /// files, stored under [`default_base_dir`].
    pub fn new<I, P>(schema_files: I, db_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            schema_files: schema_files.into_iter().map(Into::into).collect(),
            db_name: db_name.into(),
            base_dir: default_base_dir(),
            migration: MigrationOptions::default(),
            sync_on_commit: true,
            on_store_created: None,
            on_open_failed: None,
        }
    }

    /// Sets the directory the store is created in.
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the migration options.
    #[must_use]
    pub const fn migration_options(mut self, options: MigrationOptions) -> Self {
        self.migration = options;
        self
    }

    /// Sets whether every commit is synced to disk.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the callback run when the backing file is first created.
    #[must_use]
    pub fn on_store_created(mut self, callback: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_store_created = Some(Arc::new(callback));
        self
    }

    /// Sets the callback run when the store cannot be opened.
    #[must_use]
    pub fn on_open_failed(mut self, callback: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_open_failed = Some(Arc::new(callback));
        self
    }

    pub(crate) fn with_callbacks(
        mut self,
        on_store_created: Option<StoreCallback>,
        on_open_failed: Option<StoreCallback>,
    ) -> Self {
        self.on_store_created = on_store_created;
        self.on_open_failed = on_open_failed;
        self
    }

    /// Schema files, in load order.
    #[must_use]
    pub fn schema_files(&self) -> &[PathBuf] {
        &self.schema_files
    }

    /// Store file name.
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Directory holding the store.
    #[must_use]
    pub fn base_dir_path(&self) -> &Path {
        &self.base_dir
    }

    /// Full path of the store file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.base_dir.join(&self.db_name)
    }

    /// Migration options.
    #[must_use]
    pub const fn migration(&self) -> MigrationOptions {
        self.migration
    }

    /// Options handed to the coordinator.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            migration: self.migration,
            sync_on_commit: self.sync_on_commit,
        }
    }

    pub(crate) fn store_created_callback(&self) -> Option<&StoreCallback> {
        self.on_store_created.as_ref()
    }

    pub(crate) fn open_failed_callback(&self) -> Option<&StoreCallback> {
        self.on_open_failed.as_ref()
    }
}

impl fmt::Debug for StoreConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfiguration")
            .field("schema_files", &self.schema_files)
            .field("db_name", &self.db_name)
            .field("base_dir", &self.base_dir)
            .field("migration", &self.migration)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("on_store_created", &self.on_store_created.is_some())
            .field("on_open_failed", &self.on_open_failed.is_some())
            .finish()
    }
}

/// The application-private data directory stores default to.
///
/// This is the platform data directory (`~/Library/Application Support` on
/// macOS, `$XDG_DATA_HOME` or `~/.local/share` on Linux, `%APPDATA%` on
/// Windows) joined with [`DATA_DIR_NAME`], or the current directory when the
/// platform has none.
#[must_use]
pub fn default_base_dir() -> PathBuf {
    base_dir_under(dirs::data_dir())
}

fn base_dir_under(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| PathBuf::from(".")).join(DATA_DIR_NAME)
}
