// src/state.rs

//! Owns the local state document published to the DCS: merges updates,
//! derives `willing`, and debounces writes by deep equality.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::document::Document;

/// Minimum wall-clock age (seconds) a replica must have been continuously
/// willing before it is eligible to race for the master lock. Named per
/// the design notes: the literal `600` in the original source is not
/// configurable, so it is surfaced here instead of buried inline.
pub const WILLINGNESS_MIN_AGE: u64 = 600;

/// Inputs that determine whether this node is currently willing
/// (invariant 1, §3): no health problems, role is replica, no veto
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WillingnessInputs {
    pub healthy: bool,
    pub is_replica: bool,
    pub veto_active: bool,
}

impl WillingnessInputs {
    pub fn is_willing(&self) -> bool {
        self.healthy && self.is_replica && !self.veto_active
    }
}

pub struct StatePublisher {
    document: Document,
    last_written: Option<Document>,
    reserved_keys: HashSet<String>,
    willing_since: Option<u64>,
    foreign_write_streak: u32,
}

impl Default for StatePublisher {
    fn default() -> Self {
        StatePublisher {
            document: Document::new(),
            last_written: None,
            reserved_keys: HashSet::new(),
            willing_since: None,
            foreign_write_streak: 0,
        }
    }
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn willing_since(&self) -> Option<u64> {
        self.willing_since
    }

    /// Merges conn-info provider output into the document once at
    /// initialization, and reserves those keys against later `update`
    /// calls. Returns the keys that were shadowed by a later provider
    /// in the same call (providers are merged in registration order
    /// by the caller, one `Document` at a time).
    pub fn seed_conn_info(&mut self, doc: &Document) -> Vec<String> {
        let shadowed = self.document.merge(doc);
        self.reserved_keys.extend(doc.keys().cloned());
        shadowed
    }

    /// Merges `updates` into the document, recomputes `willing`, and
    /// returns the document to write to the DCS if it changed and
    /// writes are not currently suppressed (`agent.initialize` present
    /// in `health_problems` is reflected by the caller never calling
    /// this with willingness inputs that would apply during init —
    /// callers pass `suppress_write = true` explicitly while
    /// initializing, per invariant 3).
    pub fn update(
        &mut self,
        updates: Document,
        willingness: WillingnessInputs,
        now_unix: u64,
        suppress_write: bool,
    ) -> Option<Document> {
        for key in updates.keys() {
            if self.reserved_keys.contains(key) {
                warn!(key = %key, "rejected update to reserved conn-info key");
            }
        }
        let non_reserved: Document = updates
            .iter()
            .filter(|(k, _)| !self.reserved_keys.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.document.merge(&non_reserved);

        if willingness.is_willing() {
            if self.willing_since.is_none() {
                self.willing_since = Some(now_unix);
            }
        } else {
            self.willing_since = None;
        }
        match self.willing_since {
            Some(ts) => self.document.insert("willing", ts as i64),
            None => self.document.insert("willing", Value::Null),
        };

        if suppress_write {
            return None;
        }

        if self.last_written.as_ref() == Some(&self.document) {
            return None;
        }

        self.last_written = Some(self.document.clone());
        Some(self.document.clone())
    }

    /// Compares a peer-reported document for this node's own id against
    /// the document this instance last wrote. A mismatch means some
    /// other process sharing the same id wrote state in between our own
    /// writes — two nodes are fighting over one identity. Returns `true`
    /// once that has happened twice in a row, so the caller logs at
    /// error level starting on the second occurrence rather than the
    /// first (a single stale read is not yet alarming).
    pub fn observe_reported_state(&mut self, seen: &Document) -> bool {
        match &self.last_written {
            Some(mine) if mine == seen => {
                self.foreign_write_streak = 0;
                false
            }
            None => false,
            _ => {
                self.foreign_write_streak += 1;
                self.foreign_write_streak >= 2
            }
        }
    }
}

/// True if a peer's recorded `willing` timestamp is old enough to be an
/// eligible takeover candidate (§4.5 step 3).
pub fn is_eligible_willing(willing: Option<u64>, now_unix: u64) -> bool {
    match willing {
        Some(ts) => ts + WILLINGNESS_MIN_AGE < now_unix,
        None => false,
    }
}
