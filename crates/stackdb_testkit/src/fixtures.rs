//! Test fixtures and stack helpers.
//!
//! Provides temporary on-disk stacks with a small people schema and helpers
//! to seed them.

use stackdb_core::{Context, Entity, ObjectId, RecordDictionary, Stack, StoreConfiguration};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Schema used by the fixtures: a `Person` keyed by `uid` and a `Group`.
pub const PEOPLE_SCHEMA: &str = r#"{
  "version": "1",
  "entities": [
    {
      "name": "Person",
      "attributes": [
        { "name": "uid", "type": "integer", "optional": true },
        { "name": "name", "type": "text", "optional": true },
        { "name": "age", "type": "integer", "optional": true },
        { "name": "active", "type": "boolean", "optional": true }
      ]
    },
    {
      "name": "Group",
      "attributes": [
        { "name": "slug", "type": "text" },
        { "name": "members", "type": "integer", "optional": true }
      ]
    }
  ]
}"#;

/// Store file name used by [`TestStack`].
pub const TEST_DB_NAME: &str = "test.sdb";

/// Builds schema JSON from `(entity, [(attribute, type, optional)])` rows.
pub fn schema_json(version: &str, entities: &[(&str, &[(&str, &str, bool)])]) -> String {
    let entities: Vec<serde_json::Value> = entities
        .iter()
        .map(|(name, attributes)| {
            let attributes: Vec<serde_json::Value> = attributes
                .iter()
                .map(|(name, ty, optional)| serde_json::json!({ "name": name, "type": ty, "optional": optional }))
                .collect();
            serde_json::json!({ "name": name, "attributes": attributes })
        })
        .collect();
    serde_json::json!({ "version": version, "entities": entities }).to_string()
}

/// Writes `json` to `dir/name` and returns the path.
pub fn write_schema(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, json).expect("Failed to write schema file");
    path
}

/// A stack over a store in a temporary directory.
pub struct TestStack {
    /// The stack instance.
    pub stack: Stack,
    config: StoreConfiguration,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestStack {
    /// Creates a stack with [`PEOPLE_SCHEMA`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a stack with [`PEOPLE_SCHEMA`], letting `configure` adjust
    /// the configuration first.
    pub fn with_config(configure: impl FnOnce(StoreConfiguration) -> StoreConfiguration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let schema = write_schema(temp_dir.path(), "people.json", PEOPLE_SCHEMA);
        let config = configure(StoreConfiguration::new([schema], TEST_DB_NAME).base_dir(temp_dir.path()));
        Self {
            stack: Stack::new(config.clone()),
            config,
            _temp_dir: temp_dir,
        }
    }

    /// The configuration the stack was built from.
    pub fn config(&self) -> &StoreConfiguration {
        &self.config
    }

    /// The temporary directory holding the store and schema.
    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Path of the store file.
    pub fn path(&self) -> PathBuf {
        self.config.store_path()
    }

    /// Another stack over the same configuration.
    pub fn another(&self) -> Stack {
        Stack::new(self.config.clone())
    }

    /// Drops the stack and builds a new one over the same file.
    ///
    /// Background contexts of the old stack keep its store open until their
    /// workers finish, so drop them and let their work complete first.
    pub fn reopen(self) -> Self {
        let Self {
            stack,
            config,
            _temp_dir,
        } = self;
        drop(stack);
        Self {
            stack: Stack::new(config.clone()),
            config,
            _temp_dir,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStack {
    type Target = Stack;

    fn deref(&self) -> &Self::Target {
        &self.stack
    }
}

/// Runs a test with a temporary stack.
///
/// # Example
///
/// ```rust,ignore
/// use stackdb_testkit::with_temp_stack;
///
/// #[test]
/// fn my_test() {
///     with_temp_stack(|stack| {
///         assert!(stack.is_available());
///     });
/// }
/// ```
pub fn with_temp_stack<F, R>(f: F) -> R
where
    F: FnOnce(&Stack) -> R,
{
    let test_stack = TestStack::new();
    f(&test_stack.stack)
}

/// A `Person` dictionary.
pub fn person(uid: i64, name: &str) -> RecordDictionary {
    RecordDictionary::new().with("uid", uid).with("name", name)
}

/// Inserts and saves every dictionary as a `Person` on `context`.
pub fn seed(context: &Context, people: &[RecordDictionary]) -> Vec<ObjectId> {
    let entity = Entity::named("Person");
    people
        .iter()
        .map(|p| {
            entity
                .insert_object_with_dictionary(context, p.clone())
                .expect("Failed to seed person")
        })
        .collect()
}
