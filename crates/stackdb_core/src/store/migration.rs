//! Bringing a stored file up to date with the current schema.
//!
//! Migrations are inferred, never scripted: the stored header carries the
//! entity descriptions the records were written with, and the mapping to the
//! current schema is derived from the two.
//!
//! - Entities missing from the current schema are dropped with their records.
//! - Attributes missing from the current schema are dropped from every record.
//! - New optional attributes are filled with `Null`.
//! - A new required attribute, or a type change that leaves a required value
//!   unrepresentable, fails the open if any record is affected.

use crate::config::MigrationOptions;
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::store::format::StoreHeader;
use crate::store::state::StoreState;
use stackdb_codec::Value;

/// What opening a store with a given schema requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MigrationStep {
    /// Header and schema agree.
    None,
    /// Only the version label changed; the header is rewritten.
    Relabel,
    /// The structure changed; records are mapped and the file compacted.
    Infer,
}

/// Summary of an inferred migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Entities dropped with all their records.
    pub dropped_entities: Vec<String>,
    /// `Entity.attribute` names removed from records.
    pub dropped_attributes: Vec<String>,
    /// `Entity.attribute` names added as `Null`.
    pub added_attributes: Vec<String>,
    /// Records removed with dropped entities.
    pub dropped_records: usize,
}

/// Decides what `header` needs before it can be used with `schema`.
pub(crate) fn plan(header: &StoreHeader, schema: &Schema, options: MigrationOptions) -> CoreResult<MigrationStep> {
    let same_structure = header.fingerprint == schema.fingerprint();
    let same_label = header.schema_version == schema.version();

    match (same_structure, same_label) {
        (true, true) => Ok(MigrationStep::None),
        (true, false) if options.ignore_store_versioning => Ok(MigrationStep::None),
        (true, false) if options.auto_migrate_stores => Ok(MigrationStep::Relabel),
        (true, false) => Err(CoreError::migration_failed(format!(
            "store has schema version {}, model is {} and migration is disabled",
            header.schema_version,
            schema.version()
        ))),
        (false, _) if options.auto_migrate_stores && options.auto_infer_mapping => Ok(MigrationStep::Infer),
        (false, _) if options.auto_migrate_stores => Err(CoreError::migration_failed(
            "store schema differs from the model and mapping inference is disabled",
        )),
        (false, _) => Err(CoreError::migration_failed(
            "store schema differs from the model and migration is disabled",
        )),
    }
}

/// Maps `state`, written under `header`, onto `schema`.
///
/// The state is only modified when the whole mapping succeeds.
pub(crate) fn infer(header: &StoreHeader, state: &mut StoreState, schema: &Schema) -> CoreResult<MigrationReport> {
    let mut report = MigrationReport::default();

    for stored in &header.entities {
        let Some(current) = schema.entity(&stored.name) else {
            report.dropped_entities.push(stored.name.clone());
            continue;
        };
        for attr in &stored.attributes {
            if !current.has_attribute(&attr.name) {
                report.dropped_attributes.push(format!("{}.{}", stored.name, attr.name));
            }
        }
        for attr in &current.attributes {
            if stored.attribute(&attr.name).is_none() {
                report.added_attributes.push(format!("{}.{}", stored.name, attr.name));
            }
        }
    }

    let mut mapped = state.entities_mut().clone();
    let names: Vec<String> = mapped.keys().cloned().collect();
    for name in names {
        let Some(current) = schema.entity(&name) else {
            if let Some(records) = mapped.remove(&name) {
                report.dropped_records += records.len();
            }
            continue;
        };
        let Some(records) = mapped.get_mut(&name) else {
            continue;
        };
        for (id, record) in records.iter_mut() {
            record.fields.retain(|field, _| current.has_attribute(field));
            for attr in &current.attributes {
                let value = record.fields.get(&attr.name).cloned().unwrap_or(Value::Null);
                let fits = value.is_null() || attr.attribute_type.accepts(&value);
                match (fits, value.is_null(), attr.optional) {
                    (true, false, _) => {}
                    (_, _, true) => {
                        if !fits || !record.fields.contains_key(&attr.name) {
                            record.fields.insert(attr.name.clone(), Value::Null);
                        }
                    }
                    (true, true, false) => {
                        return Err(CoreError::migration_failed(format!(
                            "{name}.{} is required but record {id} has no value",
                            attr.name
                        )));
                    }
                    (false, _, false) => {
                        return Err(CoreError::migration_failed(format!(
                            "{name}.{} is now {} but record {id} holds {}",
                            attr.name,
                            attr.attribute_type,
                            value.kind()
                        )));
                    }
                }
            }
        }
    }

    *state.entities_mut() = mapped;
    state.reindex();
    Ok(report)
}
