//! Key/value metadata kept in the store file.
//!
//! Entries live next to the records, survive restarts and are erased by a
//! reset. Writes are durable commits of their own; the last write to a key
//! wins and is visible to every context right away.

use crate::coordinator::StoreSlot;
use crate::error::CoreResult;
use stackdb_codec::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata accessor of one stack.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    store: Arc<StoreSlot>,
}

impl MetadataStore {
    pub(crate) fn new(store: Arc<StoreSlot>) -> Self {
        Self { store }
    }

    /// Sets `key` to `value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::CoreError::StoreUnavailable)
    /// or a storage error from writing the commit.
    pub fn set_meta_value(&self, value: impl Into<Value>, key: &str) -> CoreResult<()> {
        let value = value.into();
        self.store.get()?.set_meta_value(key, value)?;
        tracing::debug!(key, "set metadata");
        Ok(())
    }

    /// Current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::CoreError::StoreUnavailable).
    pub fn meta_value_for_key(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.store.get()?.meta_value(key))
    }

    /// Removes `key`, returning whether it was set.
    ///
    /// # Errors
    ///
    /// Same as [`set_meta_value`](Self::set_meta_value).
    pub fn remove_meta_value(&self, key: &str) -> CoreResult<bool> {
        self.store.get()?.remove_meta_value(key)
    }

    /// Every key, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::CoreError::StoreUnavailable).
    pub fn meta_keys(&self) -> CoreResult<Vec<String>> {
        Ok(self.store.get()?.metadata().into_keys().collect())
    }

    /// Every entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::CoreError::StoreUnavailable).
    pub fn entries(&self) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self.store.get()?.metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::coordinator::Coordinator;
    use crate::error::CoreError;
    use crate::schema::Schema;
    use stackdb_storage::InMemoryBackend;
    use std::path::PathBuf;

    fn metadata() -> MetadataStore {
        let schema = Schema::from_json_str(r#"{"entities":[]}"#).unwrap();
        let c = Coordinator::with_backend(schema, Box::new(InMemoryBackend::new()), StoreOptions::default()).unwrap();
        MetadataStore::new(Arc::new(StoreSlot::new(PathBuf::from("mem"), Some(c))))
    }

    #[test]
    fn last_write_wins() {
        let meta = metadata();
        assert_eq!(meta.meta_value_for_key("version").unwrap(), None);
        meta.set_meta_value("1.0", "version").unwrap();
        meta.set_meta_value("1.1", "version").unwrap();
        meta.set_meta_value(3, "build").unwrap();
        assert_eq!(meta.meta_value_for_key("version").unwrap(), Some(Value::from("1.1")));
        assert_eq!(meta.meta_keys().unwrap(), vec!["build".to_string(), "version".to_string()]);
    }

    #[test]
    fn remove_reports_presence() {
        let meta = metadata();
        meta.set_meta_value(true, "flag").unwrap();
        assert!(meta.remove_meta_value("flag").unwrap());
        assert!(!meta.remove_meta_value("flag").unwrap());
        assert!(meta.entries().unwrap().is_empty());
    }

    #[test]
    fn unavailable_store_fails_fast() {
        let meta = MetadataStore::new(Arc::new(StoreSlot::new(PathBuf::from("missing"), None)));
        assert!(matches!(
            meta.meta_value_for_key("k"),
            Err(CoreError::StoreUnavailable { .. })
        ));
        assert!(meta.set_meta_value(1, "k").unwrap_err().is_store_unavailable());
    }
}
