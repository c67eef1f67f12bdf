// src/document.rs

//! Canonical, order-independent serialization of the nested maps-with-
//! scalar-leaves documents the agent publishes to the DCS.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-describing document: an ordered map from string keys to
/// JSON-compatible values (scalars, nested documents, or arrays of
/// either). Backed by a `BTreeMap` so re-serialization is byte-stable
/// regardless of insertion order, which is what the state publisher's
/// change-detection relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` on top of `self`, overwriting keys present in both.
    /// Returns the set of keys that were overwritten (non-identical
    /// values), for shadowing diagnostics.
    pub fn merge(&mut self, other: &Document) -> Vec<String> {
        let mut shadowed = Vec::new();
        for (k, v) in other.iter() {
            if let Some(existing) = self.0.get(k)
                && existing != v
            {
                shadowed.push(k.clone());
            }
            self.0.insert(k.clone(), v.clone());
        }
        shadowed
    }

    /// Canonical text encoding, stable across calls for equal documents.
    pub fn to_canonical_string(&self) -> String {
        serde_json::to_string(&self.0).expect("Document values are always JSON-serializable")
    }

    pub fn from_canonical_str(s: &str) -> serde_json::Result<Self> {
        let map: BTreeMap<String, Value> = serde_json::from_str(s)?;
        Ok(Document(map))
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document(iter.into_iter().collect())
    }
}
