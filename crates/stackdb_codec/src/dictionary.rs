//! Record dictionaries: the detached, thread-free form of a record.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// A plain field-name to [`Value`] mapping representing one record.
///
/// Dictionaries are the unit of input for reconciliation and bulk insert and
/// the only form in which record contents cross context boundaries. Keys are
/// kept sorted so two dictionaries with the same contents encode identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordDictionary {
    fields: BTreeMap<String, Value>,
}

impl RecordDictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Looks up a field, treating `Null` as absent.
    #[must_use]
    pub fn get_non_null(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Returns true if the field is present (even if `Null`).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Iterates over field names in order.
    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.fields.keys()
    }

    /// Keeps only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.fields.retain(|k, v| keep(k, v));
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RecordDictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for RecordDictionary {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordDictionary {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl Extend<(String, Value)> for RecordDictionary {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.fields.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let dict = RecordDictionary::new().with("id", 1).with("name", "Ada");

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("id"), Some(&Value::Integer(1)));
        assert_eq!(dict.get("missing"), None);
    }

    #[test]
    fn null_is_present_but_not_non_null() {
        let dict = RecordDictionary::new().with("nick", Value::Null);

        assert!(dict.contains_key("nick"));
        assert!(dict.get_non_null("nick").is_none());
    }

    #[test]
    fn keys_are_ordered() {
        let dict: RecordDictionary = [("zeta", 1), ("alpha", 2), ("mid", 3)].into_iter().collect();
        let keys: Vec<&str> = dict.keys().map(String::as_str).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn retain_filters_fields() {
        let mut dict = RecordDictionary::new().with("a", 1).with("b", Value::Null);
        dict.retain(|_, v| !v.is_null());
        assert_eq!(dict.len(), 1);
        assert!(dict.contains_key("a"));
    }
}
