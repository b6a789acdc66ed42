//! Inspect command implementation.

use super::{value_to_json, CliResult, OpenOptions};
use serde::Serialize;
use stackdb_core::Coordinator;
use std::collections::BTreeMap;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Schema version label.
    pub schema_version: String,
    /// Sequence number of the last commit.
    pub last_commit: u64,
    /// Total number of records.
    pub record_count: usize,
    /// Records per entity.
    pub entities: BTreeMap<String, usize>,
    /// Metadata entries.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Migration applied while opening, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationSummary>,
}

/// What opening the store had to change.
#[derive(Debug, Serialize)]
pub struct MigrationSummary {
    /// Entities dropped with their records.
    pub dropped_entities: Vec<String>,
    /// Attributes removed from records.
    pub dropped_attributes: Vec<String>,
    /// Attributes added as null.
    pub added_attributes: Vec<String>,
    /// Records removed.
    pub dropped_records: usize,
}

/// Collects the statistics for an open store.
pub fn inspect(coordinator: &Coordinator) -> CliResult<InspectResult> {
    Ok(InspectResult {
        path: coordinator
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        file_size: coordinator.file_size()?,
        schema_version: coordinator.schema().version().to_string(),
        last_commit: coordinator.last_commit(),
        record_count: coordinator.record_count(),
        entities: coordinator.entity_counts(),
        metadata: coordinator
            .metadata()
            .iter()
            .map(|(key, value)| (key.clone(), value_to_json(value)))
            .collect(),
        migration: coordinator.migration_report().map(|report| MigrationSummary {
            dropped_entities: report.dropped_entities.clone(),
            dropped_attributes: report.dropped_attributes.clone(),
            added_attributes: report.added_attributes.clone(),
            dropped_records: report.dropped_records,
        }),
    })
}

/// Runs the inspect command.
pub fn run(open: &OpenOptions, format: &str) -> CliResult<()> {
    let coordinator = open.open()?;
    let result = inspect(&coordinator)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("stackdb Store Inspection");
    println!("========================");
    println!();
    println!("Path:           {}", result.path);
    println!("File size:      {} bytes", result.file_size);
    println!("Schema version: {}", result.schema_version);
    println!("Last commit:    {}", result.last_commit);
    println!("Records:        {}", result.record_count);

    println!();
    println!("Entities:");
    for (name, count) in &result.entities {
        println!("  {name:<20} {count}");
    }

    if !result.metadata.is_empty() {
        println!();
        println!("Metadata:");
        for (key, value) in &result.metadata {
            println!("  {key:<20} {value}");
        }
    }

    if let Some(migration) = &result.migration {
        println!();
        println!("Migrated on open:");
        println!("  Dropped entities:   {}", migration.dropped_entities.join(", "));
        println!("  Dropped attributes: {}", migration.dropped_attributes.join(", "));
        println!("  Added attributes:   {}", migration.added_attributes.join(", "));
        println!("  Dropped records:    {}", migration.dropped_records);
    }
}
