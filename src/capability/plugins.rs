// src/capability/plugins.rs

//! Capability traits for identity, connection-info publication, health
//! monitors, takeover vetoes, replica ranking, and process control —
//! plus the narrow `AgentHandle` interface monitors use to call back
//! into the agent without holding a reference to the whole `Agent`.

use crate::document::Document;

/// Required, `single` arity. An opaque, per-machine stable identifier.
pub trait NodeIdentity: Send + Sync {
    fn my_id(&self) -> String;
}

/// `multiple` arity. Each provider contributes keys to the published
/// conn-info document (host, port, provider-specific attributes).
/// Invoked in registration order at initialization; later providers
/// shadow earlier ones (and the shadowing is logged by the caller).
pub trait ConnInfoProvider: Send + Sync {
    fn name(&self) -> &str;
    fn conn_info(&self) -> Document;
}

/// `multiple` arity. A monitor observes something about the node
/// (disk space, replication lag, a systemd unit, ...) and reports
/// health transitions through the narrow `AgentHandle` it is given at
/// invocation time, rather than holding a reference to the agent.
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one check and reports through `handle`. Called once per
    /// tick by the agent loop's monitor supervisor.
    fn check(&self, handle: &dyn AgentHandle);
}

/// `multiple` arity. Each provider may veto an otherwise-eligible
/// takeover. A missing provider list is vacuously not-vetoed (see
/// DESIGN.md's open-question resolution).
pub trait TakeoverVeto: Send + Sync {
    fn veto_takeover(&self) -> bool;
}

/// Required, `single` arity. Orders a set of willing replica ids from
/// best to worst takeover candidate.
pub trait ReplicaRanker: Send + Sync {
    fn best_replicas(&self, candidates: &[String]) -> Vec<String>;
}

/// Required, `single` arity. Abstracts process termination so
/// `Agent::restart` is exercisable in tests (§4.7 / DESIGN.md).
pub trait ProcessControl: Send + Sync {
    /// Never returns in the production implementation
    /// (`std::process::exit`); the test implementation records the
    /// call and returns normally.
    fn terminate(&self, exit_code: i32);
}

/// Narrow interface exposed to monitors to avoid a cyclic reference
/// between the agent and its plugins (§9 Design Notes).
pub trait AgentHandle: Send + Sync {
    fn mark_unhealthy(&self, key: &str, reason: &str, can_be_replica: bool);
    fn mark_healthy(&self, key: &str);
    fn restart(&self, ticks: u32);
    fn pg_connect_info(&self) -> Document;
}
