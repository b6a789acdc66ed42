//! Schema (object model) loading and validation.
//!
//! A schema is loaded from one or more JSON files:
//!
//! ```json
//! {
//!   "version": "2",
//!   "entities": [
//!     { "name": "Person",
//!       "attributes": [
//!         { "name": "id", "type": "integer" },
//!         { "name": "nickname", "type": "text", "optional": true }
//!       ] }
//!   ]
//! }
//! ```
//!
//! Entities from all files are merged in order. The merged schema has a
//! fingerprint over its structure that the store file records, so a changed
//! model is detected on open.

use crate::error::{ValidationError, ValidationErrors, ValidationProblem};
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stackdb_codec::{RecordDictionary, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A schema file could not be read.
    #[error("cannot read schema file {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A schema file is not valid JSON for the schema format.
    #[error("cannot parse schema file {path}: {source}")]
    Parse {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Two files (or one file twice) declare the same entity.
    #[error("entity {name} is declared more than once")]
    DuplicateEntity {
        /// The entity name.
        name: String,
    },

    /// An entity declares the same attribute twice.
    #[error("attribute {attribute} is declared more than once on {entity}")]
    DuplicateAttribute {
        /// The entity name.
        entity: String,
        /// The attribute name.
        attribute: String,
    },

    /// No schema files were given.
    #[error("no schema files given")]
    NoFiles,
}

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// `Value::Bool`.
    Boolean,
    /// `Value::Integer`.
    Integer,
    /// `Value::Text`.
    Text,
    /// `Value::Bytes`.
    Binary,
    /// Any non-null value.
    Any,
}

impl AttributeType {
    /// Returns true if a non-null `value` may be stored in this attribute.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Any, _)
                | (Self::Boolean, Value::Bool(_))
                | (Self::Integer, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Binary, Value::Bytes(_))
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescription {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    /// Whether the attribute may be null.
    #[serde(default)]
    pub optional: bool,
}

impl AttributeDescription {
    /// Creates a required attribute.
    pub fn required(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            optional: false,
        }
    }

    /// Creates an optional attribute.
    pub fn optional(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            optional: true,
        }
    }
}

/// A named record type and its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Entity name.
    pub name: String,
    /// Attributes, in declaration order.
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    /// Creates an entity description.
    pub fn new(name: impl Into<String>, attributes: Vec<AttributeDescription>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Returns true if `name` is an attribute of this entity.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// A dictionary with every attribute set to `Null`.
    #[must_use]
    pub fn blank_dictionary(&self) -> RecordDictionary {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), Value::Null))
            .collect()
    }

    /// Checks one field assignment.
    pub(crate) fn check_field(
        &self,
        field: &str,
        value: &Value,
        object: Option<ObjectId>,
    ) -> Option<ValidationError> {
        let problem = match self.attribute(field) {
            None => ValidationProblem::UnknownAttribute,
            Some(_) if value.is_null() => return None,
            Some(attr) if attr.attribute_type.accepts(value) => return None,
            Some(attr) => ValidationProblem::TypeMismatch {
                expected: attr.attribute_type,
                actual: value.kind(),
            },
        };
        Some(self.error(field, object, problem))
    }

    /// Validates the fields present in `dict` without requiring the rest.
    ///
    /// Used when a partial dictionary is applied on top of an existing record.
    #[must_use]
    pub fn validate_fields(&self, dict: &RecordDictionary, object: Option<ObjectId>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for (field, value) in dict {
            if let Some(e) = self.check_field(field, value, object) {
                errors.push(e);
            }
        }
        errors
    }

    /// Validates a complete record: every field as in
    /// [`validate_fields`](Self::validate_fields), plus every required
    /// attribute present and non-null.
    #[must_use]
    pub fn validate(&self, dict: &RecordDictionary, object: Option<ObjectId>) -> ValidationErrors {
        let mut errors = self.validate_fields(dict, object);
        for attr in self.attributes.iter().filter(|a| !a.optional) {
            if dict.get_non_null(&attr.name).is_none() {
                errors.push(self.error(&attr.name, object, ValidationProblem::MissingRequired));
            }
        }
        errors
    }

    fn error(&self, attribute: &str, object: Option<ObjectId>, problem: ValidationProblem) -> ValidationError {
        ValidationError {
            entity: self.name.clone(),
            attribute: attribute.to_string(),
            object,
            problem,
        }
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(default)]
    version: Option<String>,
    entities: Vec<EntityDescription>,
}

/// The merged object model of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    version: String,
    entities: BTreeMap<String, Arc<EntityDescription>>,
}

impl Schema {
    /// Version label used when no file declares one.
    pub const UNVERSIONED: &'static str = "0";

    /// Loads and merges the given schema files.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if a file cannot be read or parsed, or if an
    /// entity or attribute is declared twice.
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self, SchemaError> {
        if files.is_empty() {
            return Err(SchemaError::NoFiles);
        }
        let mut versions = Vec::new();
        let mut entities = Vec::new();
        for file in files {
            let path = file.as_ref();
            let text = fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed: SchemaFile = serde_json::from_str(&text).map_err(|source| SchemaError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            versions.extend(parsed.version);
            entities.extend(parsed.entities);
        }
        let version = if versions.is_empty() {
            Self::UNVERSIONED.to_string()
        } else {
            versions.join("+")
        };
        Self::from_entities(version, entities)
    }

    /// Parses a single schema document.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the JSON is invalid or declares an entity
    /// or attribute twice.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let parsed: SchemaFile = serde_json::from_str(json).map_err(|source| SchemaError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let version = parsed.version.unwrap_or_else(|| Self::UNVERSIONED.to_string());
        Self::from_entities(version, parsed.entities)
    }

    /// Builds a schema from entity descriptions.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if an entity or attribute is declared twice.
    pub fn from_entities(
        version: impl Into<String>,
        entities: impl IntoIterator<Item = EntityDescription>,
    ) -> Result<Self, SchemaError> {
        let mut map = BTreeMap::new();
        for entity in entities {
            let mut seen = HashSet::new();
            for attr in &entity.attributes {
                if !seen.insert(attr.name.as_str()) {
                    return Err(SchemaError::DuplicateAttribute {
                        entity: entity.name.clone(),
                        attribute: attr.name.clone(),
                    });
                }
            }
            if map.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity { name: entity.name });
            }
            map.insert(entity.name.clone(), Arc::new(entity));
        }
        Ok(Self {
            version: version.into(),
            entities: map,
        })
    }

    /// Version label.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescription>> {
        self.entities.get(name)
    }

    /// Iterates over entities in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.values().map(AsRef::as_ref)
    }

    /// Entity names in order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Hex SHA-256 over the schema structure.
    ///
    /// The version label is not part of the fingerprint, and attribute order
    /// within an entity does not matter.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.entities())
    }
}

/// Fingerprint of a set of entity descriptions.
pub(crate) fn fingerprint_of<'a>(entities: impl Iterator<Item = &'a EntityDescription>) -> String {
    let mut lines: Vec<String> = Vec::new();
    for entity in entities {
        let mut attrs: Vec<String> = entity
            .attributes
            .iter()
            .map(|a| format!("{}:{}:{}", a.name, a.attribute_type, a.optional))
            .collect();
        attrs.sort();
        lines.push(format!("{}({})", entity.name, attrs.join(",")));
    }
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
