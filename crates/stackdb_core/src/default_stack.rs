//! The process-wide default stack and the settings new stacks start from.
//!
//! There is at most one default stack. [`Stack::with_model_filenames`]
//! installs the first stack it builds; [`install`] replaces it explicitly and
//! [`clear`] tears it down. Custom stacks built with [`Stack::new`] are
//! independent of it.
//!
//! The accessors in this module act on the default stack and fail with
//! [`CoreError::NoDefaultStack`] while there is none.

use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::predicate::{FetchRequest, Predicate};
use crate::query::FindResult;
use crate::stack::Stack;
use parking_lot::{const_rwlock, RwLock};
use stackdb_codec::Value;
use std::sync::Arc;

static DEFAULT: RwLock<Option<Stack>> = const_rwlock(None);

/// Global settings applied to stacks built by [`Stack::with_model_filenames`].
///
/// Change them before building the stacks they should affect; an existing
/// stack keeps the configuration it was built with.
pub mod settings {
    use crate::config::{default_base_dir, MigrationOptions, StoreCallback, StoreConfiguration};
    use parking_lot::{const_rwlock, RwLock};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct Settings {
        base_dir: Option<PathBuf>,
        migration: MigrationOptions,
        on_store_created: Option<StoreCallback>,
        on_open_failed: Option<StoreCallback>,
    }

    static SETTINGS: RwLock<Settings> = const_rwlock(Settings {
        base_dir: None,
        migration: MigrationOptions::TRIVIAL,
        on_store_created: None,
        on_open_failed: None,
    });

    /// Sets the directory stores are created in. Defaults to
    /// [`default_base_dir`].
    pub fn set_db_base_dir(path: impl Into<PathBuf>) {
        SETTINGS.write().base_dir = Some(path.into());
    }

    /// Sets the migration options. Defaults to [`MigrationOptions::TRIVIAL`].
    pub fn set_trivial_updates_options(options: MigrationOptions) {
        SETTINGS.write().migration = options;
    }

    /// Sets the callback run when a store file is first created.
    pub fn set_on_store_created(callback: impl Fn(&Path) + Send + Sync + 'static) {
        SETTINGS.write().on_store_created = Some(Arc::new(callback));
    }

    /// Sets the callback run when a store cannot be opened.
    pub fn set_on_open_failed(callback: impl Fn(&Path) + Send + Sync + 'static) {
        SETTINGS.write().on_open_failed = Some(Arc::new(callback));
    }

    /// Restores every setting to its default.
    pub fn restore_defaults() {
        let mut settings = SETTINGS.write();
        settings.base_dir = None;
        settings.migration = MigrationOptions::TRIVIAL;
        settings.on_store_created = None;
        settings.on_open_failed = None;
    }

    /// A configuration for `db_name` built from the current settings.
    pub fn configuration_for<I, P>(schema_files: I, db_name: impl Into<String>) -> StoreConfiguration
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let settings = SETTINGS.read();
        StoreConfiguration::new(schema_files, db_name)
            .base_dir(settings.base_dir.clone().unwrap_or_else(default_base_dir))
            .migration_options(settings.migration)
            .with_callbacks(settings.on_store_created.clone(), settings.on_open_failed.clone())
    }
}

/// Makes `stack` the default stack, returning the one it replaces.
pub fn install(stack: Stack) -> Option<Stack> {
    let previous = DEFAULT.write().replace(stack);
    tracing::debug!(replaced = previous.is_some(), "installed default stack");
    previous
}

/// Installs `stack` unless a default stack exists. Returns true if it was
/// installed.
pub(crate) fn install_if_absent(stack: &Stack) -> bool {
    let mut current = DEFAULT.write();
    if current.is_some() {
        return false;
    }
    *current = Some(stack.clone());
    tracing::debug!(path = %stack.store_path().display(), "created default stack");
    true
}

/// The default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] if none is installed.
pub fn get() -> CoreResult<Stack> {
    DEFAULT.read().clone().ok_or(CoreError::NoDefaultStack)
}

/// Returns true if a default stack is installed.
#[must_use]
pub fn is_installed() -> bool {
    DEFAULT.read().is_some()
}

/// Removes and returns the default stack.
///
/// The store stays open while other handles to the stack or its contexts
/// are alive.
pub fn clear() -> Option<Stack> {
    let previous = DEFAULT.write().take();
    if previous.is_some() {
        tracing::debug!("cleared default stack");
    }
    previous
}

/// [`Stack::coordinator`] of the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`], or
/// [`CoreError::StoreUnavailable`] if its store failed to open.
pub fn coordinator() -> CoreResult<Arc<Coordinator>> {
    get()?.coordinator()
}

/// [`Stack::main_context`] of the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`].
pub fn main_context() -> CoreResult<Context> {
    Ok(get()?.main_context())
}

/// [`Stack::background_context`] of the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or a thread spawn error.
pub fn background_context() -> CoreResult<Context> {
    get()?.background_context()
}

/// [`Stack::sandbox_context`] of the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or a thread spawn error.
pub fn sandbox_context() -> CoreResult<Context> {
    get()?.sandbox_context()
}

/// [`Stack::count`] on the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or a submission error.
pub fn count<F>(context: Option<&Context>, entity: impl Into<String>, predicate: Predicate, callback: F) -> CoreResult<()>
where
    F: FnOnce(CoreResult<usize>) + Send + 'static,
{
    get()?.count(context, entity, predicate, callback)
}

/// [`Stack::find`] on the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or a submission error.
pub fn find<F>(context: Option<&Context>, request: FetchRequest, callback: F) -> CoreResult<()>
where
    F: FnOnce(CoreResult<FindResult>) + Send + 'static,
{
    get()?.find(context, request, callback)
}

/// [`Stack::set_meta_value`] on the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or the metadata error.
pub fn set_meta_value(value: impl Into<Value>, key: &str) -> CoreResult<()> {
    get()?.set_meta_value(value, key)
}

/// [`Stack::meta_value_for_key`] on the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or the metadata error.
pub fn meta_value_for_key(key: &str) -> CoreResult<Option<Value>> {
    get()?.meta_value_for_key(key)
}

/// [`Stack::reset_stack`] on the default stack.
///
/// # Errors
///
/// Returns [`CoreError::NoDefaultStack`] or [`CoreError::ResetFailed`].
pub fn reset_stack() -> CoreResult<()> {
    get()?.reset_stack()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    // The default stack is process-global; everything touching it lives in
    // this one test.
    #[test]
    fn install_get_clear() {
        clear();
        assert!(matches!(get(), Err(CoreError::NoDefaultStack)));
        assert!(matches!(meta_value_for_key("k"), Err(CoreError::NoDefaultStack)));
        assert!(matches!(coordinator(), Err(CoreError::NoDefaultStack)));

        let stack = Stack::in_memory(Schema::from_json_str(r#"{"entities":[]}"#).unwrap()).unwrap();
        assert!(install_if_absent(&stack));
        let other = Stack::in_memory(Schema::from_json_str(r#"{"entities":[]}"#).unwrap()).unwrap();
        assert!(!install_if_absent(&other));
        assert!(get().unwrap().same_stack(&stack));
        assert!(Arc::ptr_eq(&coordinator().unwrap(), &stack.coordinator().unwrap()));

        set_meta_value(7, "k").unwrap();
        assert_eq!(meta_value_for_key("k").unwrap(), Some(Value::Integer(7)));

        let replaced = install(other.clone()).unwrap();
        assert!(replaced.same_stack(&stack));
        assert!(clear().unwrap().same_stack(&other));
        assert!(!is_installed());
    }

    #[test]
    fn configuration_follows_settings() {
        let dir = std::env::temp_dir().join("stackdb-settings-test");
        settings::set_db_base_dir(&dir);
        settings::set_trivial_updates_options(crate::config::MigrationOptions::STRICT);
        let config = settings::configuration_for(["m.json"], "x.sdb");
        settings::restore_defaults();

        assert_eq!(config.store_path(), dir.join("x.sdb"));
        assert_eq!(config.migration(), crate::config::MigrationOptions::STRICT);
        let restored = settings::configuration_for(["m.json"], "x.sdb");
        assert_eq!(restored.migration(), crate::config::MigrationOptions::TRIVIAL);
    }
}
