//! Error types for stackdb core.

use crate::schema::{AttributeType, SchemaError};
use crate::types::{ContextId, ObjectId};
use stackdb_codec::ValueKind;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::thread::ThreadId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in stackdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The coordinator never opened, so no store is attached to the stack.
    #[error("store unavailable: {path} was never opened")]
    StoreUnavailable {
        /// Path of the store that failed to open.
        path: PathBuf,
    },

    /// No default stack has been installed.
    #[error("no default stack has been installed")]
    NoDefaultStack,

    /// A fetch against the store failed.
    #[error("fetch of {entity} failed: {source}")]
    FetchFailed {
        /// Entity being fetched.
        entity: String,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },

    /// One or more records failed schema validation.
    #[error("{0}")]
    ValidationFailed(ValidationErrors),

    /// Resetting the stack failed; the previous state is still in place.
    #[error("reset of {path} failed: {source}")]
    ResetFailed {
        /// Path of the store being reset.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },

    /// A context was used from a thread other than its execution domain.
    #[error("{context} is confined to thread {owner:?} but was used from {current:?}")]
    ConfinementViolation {
        /// The context that was misused.
        context: ContextId,
        /// Thread that owns the context.
        owner: ThreadId,
        /// Thread that attempted the access.
        current: ThreadId,
    },

    /// The context's worker is gone.
    #[error("{0} is closed")]
    ContextClosed(ContextId),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] stackdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] stackdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The schema files could not be loaded.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The stored data could not be migrated to the current schema.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The store file is held by another process.
    #[error("store locked: another process has exclusive access to {path}")]
    StoreLocked {
        /// Path of the locked store.
        path: PathBuf,
    },

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A frame failed its checksum before the end of the file.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Checksum recorded in the frame.
        expected: u32,
        /// Checksum of the payload as read.
        actual: u32,
    },

    /// The entity name is not part of the schema.
    #[error("unknown entity: {name}")]
    UnknownEntity {
        /// Name of the entity.
        name: String,
    },

    /// A predicate or sort key names an attribute the entity does not have.
    #[error("unknown attribute {attribute} on {entity}")]
    UnknownAttribute {
        /// Entity being queried.
        entity: String,
        /// The attribute name.
        attribute: String,
    },

    /// No record has the given object ID.
    #[error("object not found: {id}")]
    ObjectNotFound {
        /// The missing ID.
        id: ObjectId,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of what went wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Wraps an error as a fetch failure, leaving existing fetch failures and
    /// store unavailability untouched.
    pub fn fetch_failed(entity: impl Into<String>, source: CoreError) -> Self {
        match source {
            Self::FetchFailed { .. } | Self::StoreUnavailable { .. } => source,
            other => Self::FetchFailed {
                entity: entity.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wraps an error as a reset failure.
    pub fn reset_failed(path: impl Into<PathBuf>, source: CoreError) -> Self {
        Self::ResetFailed {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if this error means no store is attached.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::NoDefaultStack)
    }

    /// Returns the validation errors if this is a validation failure.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::ValidationFailed(errors) => Some(errors),
            _ => None,
        }
    }
}

/// What was wrong with a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationProblem {
    /// The field is not an attribute of the entity.
    UnknownAttribute,
    /// The value kind does not match the attribute type.
    TypeMismatch {
        /// Declared attribute type.
        expected: AttributeType,
        /// Kind of the value supplied.
        actual: ValueKind,
    },
    /// A required attribute is missing or null.
    MissingRequired,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Entity being validated.
    pub entity: String,
    /// Attribute at fault.
    pub attribute: String,
    /// Record being validated, if it has an identity yet.
    pub object: Option<ObjectId>,
    /// What went wrong.
    pub problem: ValidationProblem,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            ValidationProblem::UnknownAttribute => {
                write!(f, "{} has no attribute {}", self.entity, self.attribute)
            }
            ValidationProblem::TypeMismatch { expected, actual } => write!(
                f,
                "{}.{} expects {expected}, got {actual}",
                self.entity, self.attribute
            ),
            ValidationProblem::MissingRequired => {
                write!(f, "{}.{} is required", self.entity, self.attribute)
            }
        }?;
        if let Some(id) = self.object {
            write!(f, " (object {id})")?;
        }
        Ok(())
    }
}

/// All validation failures of one operation.
///
/// Validation never stops at the first problem: every failing field is
/// collected so callers can report them together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one error.
    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Appends all errors from `other`, keeping order.
    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterates over the errors.
    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.errors.iter()
    }

    /// Converts into `Ok(())` when empty, otherwise a validation failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationFailed`] if any error was collected.
    pub fn into_result(self) -> CoreResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ValidationFailed(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("validation failed"),
            [only] => write!(f, "validation failed: {only}"),
            many => {
                write!(f, "{} validation errors: ", many.len())?;
                for (i, e) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
        }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
