//! Property-based test generators using proptest.
//!
//! Provides strategies for values, `Person` dictionaries and reconciliation
//! batches whose keys overlap often enough to exercise every DUI branch.

use proptest::prelude::*;
use stackdb_codec::{RecordDictionary, Value};

/// Strategy for arbitrary field values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for primary keys drawn from a small range, so that batches
/// share keys.
pub fn key_strategy() -> impl Strategy<Value = i64> {
    0i64..32
}

/// Strategy for `Person` dictionaries with the given key.
pub fn person_strategy(uid: Option<i64>) -> impl Strategy<Value = RecordDictionary> {
    ("[A-Z][a-z]{1,8}", prop::option::of(0i64..120), prop::option::of(any::<bool>())).prop_map(
        move |(name, age, active)| {
            let mut dict = RecordDictionary::new().with("name", name).with("age", age).with("active", active);
            if let Some(uid) = uid {
                dict.insert("uid", uid);
            }
            dict
        },
    )
}

/// A reconciliation scenario: keys already stored and the incoming batch.
#[derive(Debug, Clone)]
pub struct DuiBatch {
    /// Distinct keys of the stored records, in insertion order.
    pub existing: Vec<i64>,
    /// Incoming dictionaries, possibly with repeated or missing keys.
    pub incoming: Vec<RecordDictionary>,
}

impl DuiBatch {
    /// Dictionaries for the stored records.
    pub fn existing_people(&self) -> Vec<RecordDictionary> {
        self.existing
            .iter()
            .map(|uid| RecordDictionary::new().with("uid", *uid).with("name", format!("existing-{uid}")))
            .collect()
    }

    /// Keys of the incoming batch; `None` where the key is missing.
    pub fn incoming_keys(&self) -> Vec<Option<i64>> {
        self.incoming
            .iter()
            .map(|d| match d.get("uid") {
                Some(Value::Integer(uid)) => Some(*uid),
                _ => None,
            })
            .collect()
    }
}

/// Strategy for reconciliation scenarios.
pub fn dui_batch_strategy() -> impl Strategy<Value = DuiBatch> {
    let existing = prop::collection::vec(key_strategy(), 0..16).prop_map(|keys| {
        let mut seen = std::collections::HashSet::new();
        keys.into_iter().filter(|k| seen.insert(*k)).collect::<Vec<_>>()
    });
    let incoming = prop::collection::vec(prop::option::weighted(0.9, key_strategy()), 0..24)
        .prop_flat_map(|keys| keys.into_iter().map(person_strategy).collect::<Vec<_>>());
    (existing, incoming).prop_map(|(existing, incoming)| DuiBatch { existing, incoming })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn batches_have_distinct_existing_keys() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let batch = dui_batch_strategy().new_tree(&mut runner).unwrap().current();
            let mut keys = batch.existing.clone();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), batch.existing.len());
            assert_eq!(batch.incoming_keys().len(), batch.incoming.len());
        }
    }
}
