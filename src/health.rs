// src/health.rs

//! Tracks the keyed set of active health problems and reports the
//! healthy↔unhealthy transitions callers must react to.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProblem {
    pub reason: String,
    pub can_be_replica: bool,
}

/// The reserved health-problem key whose presence suppresses all DCS
/// state writes (invariant 3, §3).
pub const INITIALIZE_KEY: &str = "agent.initialize";

/// What the caller should do in reaction to a `mark_unhealthy`/
/// `mark_healthy` call, per the transition rules in §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// No observable transition (problem added/removed but health
    /// state did not flip, or the call was a no-op).
    None,
    /// Went from healthy to unhealthy for the first time.
    BecameUnhealthy { can_be_replica: bool },
    /// The last outstanding problem was just cleared.
    BecameHealthy,
}

#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    problems: BTreeMap<String, HealthProblem>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problems(&self) -> &BTreeMap<String, HealthProblem> {
        &self.problems
    }

    pub fn contains(&self, key: &str) -> bool {
        self.problems.contains_key(key)
    }

    /// Any active problem with `can_be_replica == false`.
    pub fn has_replica_blocking_problem(&self) -> bool {
        self.problems.values().any(|p| !p.can_be_replica)
    }

    pub fn mark_unhealthy(
        &mut self,
        key: impl Into<String>,
        reason: impl Into<String>,
        can_be_replica: bool,
    ) -> HealthTransition {
        let was_healthy = self.is_healthy();
        self.problems.insert(
            key.into(),
            HealthProblem {
                reason: reason.into(),
                can_be_replica,
            },
        );
        if was_healthy {
            HealthTransition::BecameUnhealthy { can_be_replica }
        } else {
            HealthTransition::None
        }
    }

    pub fn mark_healthy(&mut self, key: &str) -> HealthTransition {
        if self.problems.remove(key).is_none() {
            return HealthTransition::None;
        }
        if self.is_healthy() {
            HealthTransition::BecameHealthy
        } else {
            HealthTransition::None
        }
    }
}
