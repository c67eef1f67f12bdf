// src/capability/dcs.rs

//! The DCS client adapter: the single trait the core uses to talk to the
//! distributed coordination service, plus the callback interface the
//! adapter uses to deliver events back into the single-threaded core.

use std::sync::Arc;

use async_trait::async_trait;

use crate::document::Document;

/// Outcome of a non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Acquired,
    HeldByOther,
}

/// A DCS session-state transition, delivered to `DcsCallbacks::on_session_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is temporarily unreachable; may still reconnect.
    Suspended,
    /// The session is irretrievably gone; all ephemerals are released.
    Lost,
    /// The session is established (initial connect, or reconnect after suspend).
    Connected,
}

/// One peer's published state, as returned by `list_state`.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub my_id: String,
    pub state: Document,
}

/// The operations the core needs from the DCS, all implicitly scoped to
/// this agent's session and group. Required, `single` arity.
#[async_trait]
pub trait DcsAdapter: Send + Sync {
    async fn get_dbid(&self) -> Result<Option<String>, String>;

    /// Conditionally creates the immutable dbid record. Returns `false`
    /// if a dbid was already present (and leaves it untouched).
    async fn set_dbid(&self, id: &str) -> Result<bool, String>;

    async fn get_timeline(&self) -> Result<u64, String>;
    async fn set_timeline(&self, timeline: u64) -> Result<(), String>;

    async fn lock(&self, name: &str) -> Result<LockResult, String>;
    async fn unlock(&self, name: &str) -> Result<(), String>;
    async fn lock_owner(&self, name: &str) -> Result<Option<String>, String>;

    async fn set_state(&self, doc: &Document) -> Result<(), String>;
    async fn list_state(&self) -> Result<Vec<PeerState>, String>;

    async fn set_conn_info(&self, doc: &Document) -> Result<(), String>;
    async fn delete_conn_info(&self) -> Result<(), String>;
    async fn list_conn_info(&self) -> Result<Vec<PeerState>, String>;

    /// Subscribes the given callback sink to master-lock, state, conn-info,
    /// and session-state events. Delivered single-threaded with respect
    /// to the agent (see DESIGN.md's grounding on the teacher's pubsub
    /// loop and `deadman.py`'s zookeeper listener).
    async fn watch(&self, callbacks: Arc<dyn DcsCallbacks>) -> Result<(), String>;

    /// Ends the session; must release every ephemeral this node owns
    /// (the master lock, the state/conn-info records).
    async fn disconnect(&self) -> Result<(), String>;
}

/// Narrow callback interface the core implements on itself and hands to
/// `DcsAdapter::watch`. This is the single consumer named in the design
/// notes: all four event kinds are "the adapter calling back into the
/// single-threaded core," so they share one trait rather than four.
pub trait DcsCallbacks: Send + Sync {
    fn on_master_lock_changed(&self, owner: Option<String>);
    fn on_state_changed(&self, peers: Vec<PeerState>);
    fn on_conn_info_changed(&self, peers: Vec<PeerState>);
    fn on_session_event(&self, event: SessionEvent);
}
