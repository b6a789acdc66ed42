//! Dump command implementation.

use super::{value_to_json, CliResult, OpenOptions};
use stackdb_core::{Coordinator, FetchRequest, SortDescriptor};

/// Renders the records of `entity` as one JSON object per line.
///
/// Each object carries the record id under `"_id"`.
pub fn dump_lines(
    coordinator: &Coordinator,
    entity: &str,
    limit: Option<usize>,
    sort: Option<&str>,
) -> CliResult<Vec<String>> {
    let mut request = FetchRequest::new(entity);
    if let Some(attribute) = sort {
        request = request.sort_by(SortDescriptor::ascending(attribute));
    }
    if let Some(limit) = limit {
        request = request.limit(limit);
    }

    coordinator
        .fetch_dictionaries(&request)?
        .into_iter()
        .map(|(id, dict)| {
            let mut object = serde_json::Map::new();
            object.insert("_id".to_string(), serde_json::Value::String(id.to_string()));
            for (key, value) in dict.iter() {
                object.insert(key.to_string(), value_to_json(value));
            }
            Ok(serde_json::to_string(&object)?)
        })
        .collect()
}

/// Runs the dump command.
pub fn run(open: &OpenOptions, entity: &str, limit: Option<usize>, sort: Option<&str>) -> CliResult<()> {
    let coordinator = open.open()?;
    let lines = dump_lines(&coordinator, entity, limit, sort)?;
    tracing::debug!(entity, records = lines.len(), "dumped");
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdb_core::CoreError;
    use stackdb_testkit::{person, TestStack};

    #[test]
    fn dumps_sorted_and_limited() {
        let stack = TestStack::new();
        let session = stack.main_context().session().unwrap();
        for (uid, name) in [(3, "c"), (1, "a"), (2, "b")] {
            session.insert_with_dictionary("Person", &person(uid, name)).unwrap();
        }
        session.save().unwrap();

        let lines = dump_lines(&stack.coordinator().unwrap(), "Person", Some(2), Some("uid")).unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["uid"], serde_json::json!(1));
        assert_eq!(first["name"], serde_json::json!("a"));
        assert!(first["_id"].is_string());
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let stack = TestStack::new();
        let err = dump_lines(&stack.coordinator().unwrap(), "Ghost", None, None).unwrap_err();
        assert!(matches!(err, super::super::CliError::Core(CoreError::UnknownEntity { .. })), "{err}");
    }
}
