// src/capability/mod.rs

//! The capability registry: binds named capability slots to concrete
//! providers and enforces arity at startup.

pub mod database;
pub mod dcs;
pub mod plugins;

use std::sync::Arc;

use crate::error::{DeadmanError, Result};

pub use database::DatabaseControl;
pub use dcs::DcsAdapter;
pub use plugins::{ConnInfoProvider, Monitor, NodeIdentity, ProcessControl, ReplicaRanker, TakeoverVeto};

/// Typed trait-object slots for every capability the core consumes.
///
/// `dcs`, `database`, `identity`, `process_control`, and `replica_ranker`
/// are `single` arity (exactly one provider, required). `monitors`,
/// `conn_info_providers`, and `veto_providers` are `multiple` arity
/// (zero or more, invoked in registration order).
pub struct CapabilityRegistry {
    pub dcs: Option<Arc<dyn DcsAdapter>>,
    pub database: Option<Arc<dyn DatabaseControl>>,
    pub identity: Option<Arc<dyn NodeIdentity>>,
    pub process_control: Option<Arc<dyn ProcessControl>>,
    pub replica_ranker: Option<Arc<dyn ReplicaRanker>>,
    pub monitors: Vec<Arc<dyn Monitor>>,
    pub conn_info_providers: Vec<Arc<dyn ConnInfoProvider>>,
    pub veto_providers: Vec<(String, Arc<dyn TakeoverVeto>)>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        CapabilityRegistry {
            dcs: None,
            database: None,
            identity: None,
            process_control: None,
            replica_ranker: None,
            monitors: Vec::new(),
            conn_info_providers: Vec::new(),
            veto_providers: Vec::new(),
        }
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates that every required (`single`-arity) capability has a
    /// provider. Called once after the registry is populated from the
    /// `plugins` configuration list.
    pub fn validate(&self) -> Result<()> {
        if self.dcs.is_none() {
            return Err(DeadmanError::MissingCapability { name: "dcs" });
        }
        if self.database.is_none() {
            return Err(DeadmanError::MissingCapability { name: "database" });
        }
        if self.identity.is_none() {
            return Err(DeadmanError::MissingCapability { name: "identity" });
        }
        if self.process_control.is_none() {
            return Err(DeadmanError::MissingCapability {
                name: "process_control",
            });
        }
        if self.replica_ranker.is_none() {
            return Err(DeadmanError::MissingCapability {
                name: "replica_ranker",
            });
        }
        Ok(())
    }

    /// Runs every registered veto provider and returns whether any of
    /// them vetoed. A missing provider list (empty `Vec`) is vacuously
    /// not-vetoed, per the resolved open question in DESIGN.md.
    pub fn any_veto_active(&self) -> Vec<(String, bool)> {
        self.veto_providers
            .iter()
            .map(|(name, provider)| (name.clone(), provider.veto_takeover()))
            .collect()
    }
}
