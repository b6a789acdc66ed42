//! Committed store contents held in memory.

use crate::predicate::Predicate;
use crate::store::format::{Change, Commit, MetaChange};
use crate::types::ObjectId;
use stackdb_codec::{RecordDictionary, Value};
use std::collections::{BTreeMap, HashMap};

/// A committed record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRecord {
    /// Insertion order.
    pub seq: u64,
    /// Field values.
    pub fields: RecordDictionary,
}

/// A record matched by a query.
#[derive(Debug, Clone)]
pub(crate) struct StoredMatch {
    pub id: ObjectId,
    pub seq: u64,
    pub fields: RecordDictionary,
}

/// Everything the store currently holds.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    entities: HashMap<String, HashMap<ObjectId, StoredRecord>>,
    index: HashMap<ObjectId, String>,
    metadata: BTreeMap<String, Value>,
    next_seq: u64,
    last_commit: u64,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next insertion order to hand out.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sequence number of the last applied commit.
    pub fn last_commit(&self) -> u64 {
        self.last_commit
    }

    /// Applies a commit. Replaying the same commits always yields the same
    /// state.
    pub fn apply(&mut self, commit: &Commit) {
        for change in &commit.changes {
            match change {
                Change::Put {
                    entity,
                    id,
                    seq,
                    fields,
                } => {
                    let records = self.entities.entry(entity.clone()).or_default();
                    match records.get_mut(id) {
                        Some(existing) => existing.fields = fields.clone(),
                        None => {
                            records.insert(
                                *id,
                                StoredRecord {
                                    seq: *seq,
                                    fields: fields.clone(),
                                },
                            );
                            self.index.insert(*id, entity.clone());
                        }
                    }
                    self.next_seq = self.next_seq.max(seq + 1);
                }
                Change::Delete { entity, id } => {
                    if let Some(records) = self.entities.get_mut(entity) {
                        if records.remove(id).is_some() {
                            self.index.remove(id);
                        }
                    }
                }
            }
        }
        for change in &commit.metadata {
            match change {
                MetaChange::Set { key, value } => {
                    self.metadata.insert(key.clone(), value.clone());
                }
                MetaChange::Remove { key } => {
                    self.metadata.remove(key);
                }
            }
        }
        self.last_commit = self.last_commit.max(commit.sequence);
    }

    /// Returns true if the record exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a record by identity.
    pub fn lookup(&self, id: &ObjectId) -> Option<(&str, &StoredRecord)> {
        let entity = self.index.get(id)?;
        let record = self.entities.get(entity)?.get(id)?;
        Some((entity.as_str(), record))
    }

    /// Records of `entity` matching `predicate`, in insertion order.
    pub fn matching(&self, entity: &str, predicate: &Predicate) -> Vec<StoredMatch> {
        let Some(records) = self.entities.get(entity) else {
            return Vec::new();
        };
        let mut out: Vec<StoredMatch> = records
            .iter()
            .filter(|(_, r)| predicate.matches(&r.fields))
            .map(|(id, r)| StoredMatch {
                id: *id,
                seq: r.seq,
                fields: r.fields.clone(),
            })
            .collect();
        out.sort_by_key(|m| m.seq);
        out
    }

    /// Number of records of `entity` matching `predicate`.
    pub fn count(&self, entity: &str, predicate: &Predicate) -> usize {
        self.entities
            .get(entity)
            .map_or(0, |records| records.values().filter(|r| predicate.matches(&r.fields)).count())
    }

    /// Record counts per entity, in name order.
    pub fn entity_counts(&self) -> BTreeMap<String, usize> {
        self.entities
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect()
    }

    /// Total number of records.
    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Mutable access to the records of each entity, for migration.
    pub fn entities_mut(&mut self) -> &mut HashMap<String, HashMap<ObjectId, StoredRecord>> {
        &mut self.entities
    }

    /// Rebuilds the identity index after entities were changed directly.
    pub fn reindex(&mut self) {
        self.index = self
            .entities
            .iter()
            .flat_map(|(name, records)| records.keys().map(move |id| (*id, name.clone())))
            .collect();
    }

    /// One commit that recreates this state from nothing.
    pub fn snapshot(&self) -> Commit {
        let mut records: Vec<(&String, &ObjectId, &StoredRecord)> = self
            .entities
            .iter()
            .flat_map(|(name, recs)| recs.iter().map(move |(id, r)| (name, id, r)))
            .collect();
        records.sort_by_key(|(_, _, r)| r.seq);

        Commit {
            sequence: self.last_commit,
            changes: records
                .into_iter()
                .map(|(entity, id, r)| Change::Put {
                    entity: entity.clone(),
                    id: *id,
                    seq: r.seq,
                    fields: r.fields.clone(),
                })
                .collect(),
            metadata: self
                .metadata
                .iter()
                .map(|(key, value)| MetaChange::Set {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}
