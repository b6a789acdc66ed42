//! Benchmark utilities.

use rand::seq::SliceRandom;
use rand::Rng;
use stackdb_core::{RecordDictionary, Value};
use stackdb_testkit::person;

/// `count` distinct keys in random order, drawn from `0..count * 2`.
pub fn shuffled_keys(count: usize) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    let mut keys: Vec<i64> = (0..(count * 2) as i64).collect();
    keys.shuffle(&mut rng);
    keys.truncate(count);
    keys
}

/// Integer key values for [`stackdb_core::plan`].
pub fn key_values(keys: &[i64]) -> Vec<Value> {
    keys.iter().map(|&k| Value::Integer(k)).collect()
}

/// People with the given keys and a random age.
pub fn people(keys: &[i64]) -> Vec<RecordDictionary> {
    let mut rng = rand::thread_rng();
    keys.iter()
        .map(|&uid| person(uid, &format!("person-{uid}")).with("age", rng.gen_range(0..100_i64)))
        .collect()
}
