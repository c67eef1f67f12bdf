// src/testing.rs

//! In-memory fake capability providers shared by unit and integration
//! tests, so the agent is exercisable without a real DCS or database
//! (§2.1 ambient-stack expansion).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capability::database::{DatabaseControl, ReplicationRole};
use crate::capability::dcs::{DcsAdapter, DcsCallbacks, LockResult, PeerState};
use crate::capability::plugins::{NodeIdentity, ProcessControl, ReplicaRanker};
use crate::document::Document;

#[derive(Default)]
pub struct FakeDcs {
    pub dbid: Mutex<Option<String>>,
    pub timeline: Mutex<u64>,
    pub master_lock: Mutex<Option<String>>,
    pub dbid_lock: Mutex<Option<String>>,
    pub state: Mutex<Document>,
    pub conn_info: Mutex<Document>,
    pub peer_states: Mutex<Vec<PeerState>>,
    pub callbacks: Mutex<Option<Arc<dyn DcsCallbacks>>>,
}

#[async_trait]
impl DcsAdapter for FakeDcs {
    async fn get_dbid(&self) -> Result<Option<String>, String> {
        Ok(self.dbid.lock().clone())
    }

    async fn set_dbid(&self, id: &str) -> Result<bool, String> {
        let mut dbid = self.dbid.lock();
        if dbid.is_some() {
            return Ok(false);
        }
        *dbid = Some(id.to_string());
        Ok(true)
    }

    async fn get_timeline(&self) -> Result<u64, String> {
        Ok(*self.timeline.lock())
    }

    async fn set_timeline(&self, timeline: u64) -> Result<(), String> {
        *self.timeline.lock() = timeline;
        Ok(())
    }

    async fn lock(&self, name: &str) -> Result<LockResult, String> {
        let target = if name == "database_identifier" {
            &self.dbid_lock
        } else {
            &self.master_lock
        };
        let mut held = target.lock();
        if held.is_some() {
            return Ok(LockResult::HeldByOther);
        }
        *held = Some("locked".to_string());
        Ok(LockResult::Acquired)
    }

    async fn unlock(&self, name: &str) -> Result<(), String> {
        let target = if name == "database_identifier" {
            &self.dbid_lock
        } else {
            &self.master_lock
        };
        *target.lock() = None;
        Ok(())
    }

    async fn lock_owner(&self, name: &str) -> Result<Option<String>, String> {
        let target = if name == "database_identifier" {
            &self.dbid_lock
        } else {
            &self.master_lock
        };
        Ok(target.lock().clone())
    }

    async fn set_state(&self, doc: &Document) -> Result<(), String> {
        *self.state.lock() = doc.clone();
        Ok(())
    }

    async fn list_state(&self) -> Result<Vec<PeerState>, String> {
        Ok(self.peer_states.lock().clone())
    }

    async fn set_conn_info(&self, doc: &Document) -> Result<(), String> {
        *self.conn_info.lock() = doc.clone();
        Ok(())
    }

    async fn delete_conn_info(&self) -> Result<(), String> {
        *self.conn_info.lock() = Document::new();
        Ok(())
    }

    async fn list_conn_info(&self) -> Result<Vec<PeerState>, String> {
        Ok(vec![])
    }

    async fn watch(&self, callbacks: Arc<dyn DcsCallbacks>) -> Result<(), String> {
        *self.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), String> {
        Ok(())
    }
}

pub struct FakeDatabase {
    pub dbid: String,
    pub timeline: Mutex<u64>,
    pub role: Mutex<ReplicationRole>,
    pub backups_taken: Mutex<u32>,
    pub started: Mutex<bool>,
}

impl FakeDatabase {
    pub fn new(dbid: &str, role: ReplicationRole) -> Self {
        FakeDatabase {
            dbid: dbid.to_string(),
            timeline: Mutex::new(0),
            role: Mutex::new(role),
            backups_taken: Mutex::new(0),
            started: Mutex::new(false),
        }
    }
}

#[async_trait]
impl DatabaseControl for FakeDatabase {
    async fn start(&self) -> Result<(), String> {
        *self.started.lock() = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        *self.started.lock() = false;
        Ok(())
    }

    async fn initdb(&self) -> Result<(), String> {
        Ok(())
    }

    async fn reset(&self) -> Result<(), String> {
        Ok(())
    }

    async fn backup(&self) -> Result<(), String> {
        *self.backups_taken.lock() += 1;
        Ok(())
    }

    async fn restore(&self) -> Result<(), String> {
        Ok(())
    }

    async fn setup_replication(&self, _primary: Option<&str>) -> Result<(), String> {
        *self.role.lock() = ReplicationRole::Replica;
        Ok(())
    }

    async fn stop_replication(&self) -> Result<(), String> {
        *self.role.lock() = ReplicationRole::Master;
        Ok(())
    }

    async fn reload(&self) -> Result<(), String> {
        Ok(())
    }

    async fn get_database_identifier(&self) -> Result<String, String> {
        Ok(self.dbid.clone())
    }

    async fn get_timeline(&self) -> Result<u64, String> {
        Ok(*self.timeline.lock())
    }

    async fn replication_role(&self) -> Result<ReplicationRole, String> {
        Ok(*self.role.lock())
    }
}

pub struct FakeIdentity(String);

impl FakeIdentity {
    pub fn new(id: &str) -> Self {
        FakeIdentity(id.to_string())
    }
}

impl NodeIdentity for FakeIdentity {
    fn my_id(&self) -> String {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct FakeProcessControl {
    terminated_with: Mutex<Option<i32>>,
}

impl FakeProcessControl {
    pub fn terminated_with(&self) -> Option<i32> {
        *self.terminated_with.lock()
    }
}

impl ProcessControl for FakeProcessControl {
    fn terminate(&self, exit_code: i32) {
        *self.terminated_with.lock() = Some(exit_code);
    }
}

pub struct FakeReplicaRanker;

impl ReplicaRanker for FakeReplicaRanker {
    fn best_replicas(&self, candidates: &[String]) -> Vec<String> {
        candidates.to_vec()
    }
}
