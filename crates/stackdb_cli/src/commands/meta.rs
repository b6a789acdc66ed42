//! Metadata commands.

use super::{parse_value, value_to_json, CliResult, OpenOptions};

/// Prints the value stored under `key` as JSON, or `null`.
pub fn get(open: &OpenOptions, key: &str) -> CliResult<()> {
    let coordinator = open.open()?;
    let value = coordinator.meta_value(key);
    println!(
        "{}",
        value.as_ref().map_or(serde_json::Value::Null, value_to_json)
    );
    Ok(())
}

/// Sets `key` to the parsed `value`.
pub fn set(open: &OpenOptions, key: &str, value: &str) -> CliResult<()> {
    let coordinator = open.open()?;
    let value = parse_value(value);
    tracing::debug!(key, kind = %value.kind(), "setting metadata");
    coordinator.set_meta_value(key, value)?;
    Ok(())
}

/// Removes `key`.
pub fn remove(open: &OpenOptions, key: &str) -> CliResult<()> {
    let coordinator = open.open()?;
    if !coordinator.remove_meta_value(key)? {
        tracing::warn!(key, "no such metadata key");
    }
    Ok(())
}

/// Prints every entry as a pretty JSON object.
pub fn list(open: &OpenOptions) -> CliResult<()> {
    let coordinator = open.open()?;
    let entries: serde_json::Map<String, serde_json::Value> = coordinator
        .metadata()
        .iter()
        .map(|(key, value)| (key.clone(), value_to_json(value)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdb_core::Value;
    use stackdb_testkit::TestStack;

    fn options(stack: &TestStack) -> OpenOptions {
        OpenOptions {
            path: stack.path(),
            schema: stack.config().schema_files().to_vec(),
            migrate: false,
        }
    }

    #[test]
    fn set_and_remove_go_through_the_open_store() {
        let stack = TestStack::new();
        let open = options(&stack);

        set(&open, "generation", "7").unwrap();
        assert_eq!(stack.meta_value_for_key("generation").unwrap(), Some(Value::Integer(7)));

        remove(&open, "generation").unwrap();
        assert_eq!(stack.meta_value_for_key("generation").unwrap(), None);
        remove(&open, "generation").unwrap();
    }

    #[test]
    fn missing_store_is_a_usage_error() {
        let stack = TestStack::new();
        let open = OpenOptions {
            path: stack.dir().join("absent.sdb"),
            ..options(&stack)
        };
        assert!(matches!(get(&open, "k"), Err(super::super::CliError::Usage(_))));
    }
}
