//! Foreign-key secondary index: `(property, key) -> {entity id}`.

use crate::types::Id;
use std::collections::{BTreeSet, HashMap};

/// Kept incrementally in sync with the cache that owns it. A reverse map of
/// the keys each entity was indexed under makes removal independent of the
/// entity's current field values.
#[derive(Debug, Default)]
pub struct ForeignKeyIndex {
    properties: Vec<&'static str>,
    buckets: HashMap<(&'static str, Id), BTreeSet<Id>>,
    indexed_under: HashMap<Id, Vec<(&'static str, Id)>>,
}

impl ForeignKeyIndex {
    pub fn new(properties: Vec<&'static str>) -> Self {
        ForeignKeyIndex {
            properties,
            ..Default::default()
        }
    }

    pub fn properties(&self) -> &[&'static str] {
        &self.properties
    }

    pub fn is_indexed(&self, property: &str) -> bool {
        self.properties.contains(&property)
    }

    /// Index `id` under the given keys, replacing any previous keys.
    pub fn insert(&mut self, id: Id, keys: Vec<(&'static str, Id)>) {
        self.remove(id);
        for key in &keys {
            self.buckets.entry(*key).or_default().insert(id);
        }
        self.indexed_under.insert(id, keys);
    }

    pub fn remove(&mut self, id: Id) {
        let Some(keys) = self.indexed_under.remove(&id) else {
            return;
        };
        for key in keys {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    /// Ids indexed under `property = value`; `None` when the property is not indexed.
    pub fn lookup(&self, property: &str, value: Id) -> Option<Vec<Id>> {
        let property = *self.properties.iter().find(|p| **p == property)?;
        Some(
            self.buckets
                .get(&(property, value))
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
        )
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.indexed_under.clear();
    }
}
