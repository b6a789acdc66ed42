//! Frame payloads.

use crate::schema::{fingerprint_of, EntityDescription, Schema};
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use stackdb_codec::{RecordDictionary, Value};

/// Current store file format version.
pub const FORMAT_VERSION: u16 = 1;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame of every store file.
    Header(StoreHeader),
    /// One committed save.
    Commit(Commit),
}

/// Describes the schema the file was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHeader {
    /// File format version.
    pub format_version: u16,
    /// Schema version label.
    pub schema_version: String,
    /// Schema structure fingerprint.
    pub fingerprint: String,
    /// The entities the records below conform to.
    pub entities: Vec<EntityDescription>,
}

impl StoreHeader {
    /// Header for a store written with `schema`.
    pub fn for_schema(schema: &Schema) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema_version: schema.version().to_string(),
            fingerprint: schema.fingerprint(),
            entities: schema.entities().cloned().collect(),
        }
    }

    /// Recomputes the fingerprint from the stored entities.
    pub fn computed_fingerprint(&self) -> String {
        fingerprint_of(self.entities.iter())
    }

    /// Looks up a stored entity description.
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Record and metadata changes of one save, applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Monotonic commit number.
    pub sequence: u64,
    /// Record changes, in order.
    pub changes: Vec<Change>,
    /// Metadata changes, in order.
    pub metadata: Vec<MetaChange>,
}

impl Commit {
    /// Returns true if the commit carries nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.metadata.is_empty()
    }
}

/// One record change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// Insert or overwrite a record.
    Put {
        /// Entity name.
        entity: String,
        /// Record identity.
        id: ObjectId,
        /// Insertion order; ignored when the record already exists.
        seq: u64,
        /// Complete field values.
        fields: RecordDictionary,
    },
    /// Remove a record.
    Delete {
        /// Entity name.
        entity: String,
        /// Record identity.
        id: ObjectId,
    },
}

/// One metadata change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaChange {
    /// Set `key` to `value`.
    Set {
        /// Key.
        key: String,
        /// Value.
        value: Value,
    },
    /// Remove `key`.
    Remove {
        /// Key.
        key: String,
    },
}
