//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod maintenance;
pub mod meta;

use stackdb_core::{Coordinator, CoreError, MigrationOptions, Schema, StoreOptions, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad invocation.
    #[error("{0}")]
    Usage(String),

    /// Store error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// How to open the store a command works on.
pub struct OpenOptions {
    /// Store file.
    pub path: PathBuf,
    /// Schema files.
    pub schema: Vec<PathBuf>,
    /// Whether to allow migrating the store.
    pub migrate: bool,
}

impl OpenOptions {
    /// Opens the store.
    ///
    /// Without `--migrate` a store whose schema differs from the given files
    /// is refused rather than rewritten.
    pub fn open(&self) -> CliResult<Arc<Coordinator>> {
        if self.schema.is_empty() {
            return Err(CliError::usage("at least one schema file is required (--schema)"));
        }
        if !self.path.exists() {
            return Err(CliError::usage(format!("no store found at {}", self.path.display())));
        }
        let schema = Schema::load(&self.schema).map_err(CoreError::from)?;
        let migration = if self.migrate {
            MigrationOptions::TRIVIAL
        } else {
            MigrationOptions::STRICT.ignore_store_versioning(true)
        };
        let options = StoreOptions {
            migration,
            sync_on_commit: true,
        };
        tracing::debug!(path = %self.path.display(), migrate = self.migrate, "opening store");
        Ok(Coordinator::open(schema, &self.path, options)?)
    }
}

/// Converts a field value to JSON; binary values become lowercase hex.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
    }
}

/// Parses a value typed on the command line.
pub fn parse_value(input: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(serde_json::Value::Null) => Value::Null,
        Ok(serde_json::Value::Bool(b)) => Value::Bool(b),
        Ok(serde_json::Value::Number(n)) if n.is_i64() => n.as_i64().map_or(Value::Null, Value::Integer),
        Ok(serde_json::Value::String(s)) => Value::Text(s),
        _ => Value::Text(input.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_values() {
        assert_eq!(parse_value("42"), Value::Integer(42));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("\"7\""), Value::Text("7".to_string()));
        assert_eq!(parse_value("v1.2"), Value::Text("v1.2".to_string()));
        assert_eq!(parse_value("1.5"), Value::Text("1.5".to_string()));
    }

    #[test]
    fn converts_values_to_json() {
        assert_eq!(value_to_json(&Value::Bytes(vec![0, 255])), serde_json::json!("00ff"));
        assert_eq!(value_to_json(&Value::Integer(-3)), serde_json::json!(-3));
        assert_eq!(value_to_json(&Value::Null), serde_json::Value::Null);
    }
}
