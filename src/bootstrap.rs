// src/bootstrap.rs

//! First-start logic: bootstrap a fresh master, bootstrap a replica
//! from backup, or re-enter steady state on a restart (§4.6).

use crate::capability::database::{DatabaseControl, ReplicationRole};
use crate::capability::dcs::{DcsAdapter, LockResult};
use crate::error::{DeadmanError, Result};

/// Exit code used when bootstrap fails irrecoverably (§6, §7).
pub const FATAL_BOOTSTRAP_EXIT_CODE: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Initialization is complete; the agent should enter the steady
    /// state event loop as master.
    ProceedAsMaster,
    /// Initialization is complete; the agent should enter the steady
    /// state event loop as replica.
    ProceedAsReplica,
    /// Restart after `ticks` ticks and re-run bootstrap/initialize.
    RestartAfter(u32),
    /// Unrecoverable; the database has been reset and the process
    /// must exit with the given code.
    Fatal(i32),
}

/// Decides which bootstrap path applies and runs it, or runs
/// steady-state `initialize()` if the node already has a matching
/// dbid (§4.6).
pub async fn initialize(
    dcs: &dyn DcsAdapter,
    db: &dyn DatabaseControl,
    my_id: &str,
) -> Result<BootstrapOutcome> {
    let dcs_dbid = dcs.get_dbid().await.map_err(DeadmanError::Dcs)?;

    match dcs_dbid {
        None => master_bootstrap(dcs, db).await,
        Some(remote_dbid) => {
            let local_dbid = db.get_database_identifier().await.map_err(DeadmanError::Database)?;
            if local_dbid == remote_dbid {
                steady_state_initialize(dcs, db, my_id, &local_dbid).await
            } else {
                replica_bootstrap(dcs, db).await
            }
        }
    }
}

/// §4.6 "Master bootstrap": no dbid recorded in the DCS yet.
pub async fn master_bootstrap(
    dcs: &dyn DcsAdapter,
    db: &dyn DatabaseControl,
) -> Result<BootstrapOutcome> {
    db.initdb().await.map_err(DeadmanError::Database)?;
    db.start().await.map_err(DeadmanError::Database)?;
    let local_dbid = db
        .get_database_identifier()
        .await
        .map_err(DeadmanError::Database)?;

    match dcs
        .lock("database_identifier")
        .await
        .map_err(DeadmanError::Dcs)?
    {
        LockResult::HeldByOther => return Ok(BootstrapOutcome::RestartAfter(5)),
        LockResult::Acquired => {}
    }

    if dcs.get_dbid().await.map_err(DeadmanError::Dcs)?.is_some() {
        // Someone else already completed bootstrap while we waited
        // for the lock; restart immediately to re-enter as replica.
        return Ok(BootstrapOutcome::RestartAfter(0));
    }

    db.backup().await.map_err(DeadmanError::Database)?;
    let written = dcs
        .set_dbid(&local_dbid)
        .await
        .map_err(DeadmanError::Dcs)?;
    if !written {
        return Err(DeadmanError::InvariantViolation(
            "set_dbid failed while holding the database_identifier lock".to_string(),
        ));
    }

    Ok(BootstrapOutcome::RestartAfter(0))
}

/// §4.6 "Replica bootstrap": local dbid is absent or mismatches the
/// DCS-recorded one.
pub async fn replica_bootstrap(
    dcs: &dyn DcsAdapter,
    db: &dyn DatabaseControl,
) -> Result<BootstrapOutcome> {
    db.stop().await.map_err(DeadmanError::Database)?;
    db.initdb().await.map_err(DeadmanError::Database)?;

    if db.restore().await.is_err() {
        db.reset().await.map_err(DeadmanError::Database)?;
        return Ok(BootstrapOutcome::Fatal(FATAL_BOOTSTRAP_EXIT_CODE));
    }

    db.setup_replication(None)
        .await
        .map_err(DeadmanError::Database)?;

    let role = db.replication_role().await.map_err(DeadmanError::Database)?;
    let local_dbid = db
        .get_database_identifier()
        .await
        .map_err(DeadmanError::Database)?;
    let dcs_dbid = dcs.get_dbid().await.map_err(DeadmanError::Dcs)?;

    if role != ReplicationRole::Replica || dcs_dbid.as_deref() != Some(local_dbid.as_str()) {
        db.reset().await.map_err(DeadmanError::Database)?;
        return Ok(BootstrapOutcome::Fatal(FATAL_BOOTSTRAP_EXIT_CODE));
    }

    Ok(BootstrapOutcome::ProceedAsReplica)
}

/// §4.6 "Steady-state initialize": local dbid already matches the DCS.
async fn steady_state_initialize(
    dcs: &dyn DcsAdapter,
    db: &dyn DatabaseControl,
    my_id: &str,
    local_dbid: &str,
) -> Result<BootstrapOutcome> {
    let role = db.replication_role().await.map_err(DeadmanError::Database)?;

    if role == ReplicationRole::Master {
        let lock_owner = dcs.lock_owner("master").await.map_err(DeadmanError::Dcs)?;
        if lock_owner.as_deref() == Some(my_id) {
            db.start().await.map_err(DeadmanError::Database)?;
            return Ok(BootstrapOutcome::ProceedAsMaster);
        }

        // Master role locally but the lock isn't ours: stop the DB
        // (split-brain guard) and decide whether a newer master has
        // already taken over.
        db.stop().await.map_err(DeadmanError::Database)?;
        let local_timeline = db.get_timeline().await.map_err(DeadmanError::Database)?;
        let dcs_timeline = dcs.get_timeline().await.map_err(DeadmanError::Dcs)?;
        if dcs_timeline > local_timeline {
            // A newer master already exists: this node's database is
            // stale split-brain risk, not an unrecoverable failure —
            // reset and let the supervisor restart it into replica
            // bootstrap.
            db.reset().await.map_err(DeadmanError::Database)?;
        }
        return Ok(BootstrapOutcome::RestartAfter(5));
    }

    db.start().await.map_err(DeadmanError::Database)?;
    let _ = local_dbid;
    Ok(BootstrapOutcome::ProceedAsReplica)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeDcs {
        dbid: Mutex<Option<String>>,
        timeline: Mutex<u64>,
        master_lock: Mutex<Option<String>>,
        dbid_lock: Mutex<Option<String>>,
        lock_attempts_as: String,
    }

    #[async_trait]
    impl DcsAdapter for FakeDcs {
        async fn get_dbid(&self) -> std::result::Result<Option<String>, String> {
            Ok(self.dbid.lock().clone())
        }
        async fn set_dbid(&self, id: &str) -> std::result::Result<bool, String> {
            let mut dbid = self.dbid.lock();
            if dbid.is_some() {
                return Ok(false);
            }
            *dbid = Some(id.to_string());
            Ok(true)
        }
        async fn get_timeline(&self) -> std::result::Result<u64, String> {
            Ok(*self.timeline.lock())
        }
        async fn set_timeline(&self, timeline: u64) -> std::result::Result<(), String> {
            *self.timeline.lock() = timeline;
            Ok(())
        }
        async fn lock(&self, name: &str) -> std::result::Result<LockResult, String> {
            let target = if name == "database_identifier" {
                &self.dbid_lock
            } else {
                &self.master_lock
            };
            let mut held = target.lock();
            if held.is_some() {
                return Ok(LockResult::HeldByOther);
            }
            *held = Some(self.lock_attempts_as.clone());
            Ok(LockResult::Acquired)
        }
        async fn unlock(&self, _name: &str) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn lock_owner(&self, name: &str) -> std::result::Result<Option<String>, String> {
            let target = if name == "database_identifier" {
                &self.dbid_lock
            } else {
                &self.master_lock
            };
            Ok(target.lock().clone())
        }
        async fn set_state(&self, _doc: &Document) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn list_state(
            &self,
        ) -> std::result::Result<Vec<crate::capability::dcs::PeerState>, String> {
            Ok(vec![])
        }
        async fn set_conn_info(&self, _doc: &Document) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn delete_conn_info(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn list_conn_info(
            &self,
        ) -> std::result::Result<Vec<crate::capability::dcs::PeerState>, String> {
            Ok(vec![])
        }
        async fn watch(
            &self,
            _callbacks: Arc<dyn crate::capability::dcs::DcsCallbacks>,
        ) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct FakeDb {
        dbid: String,
        timeline: Mutex<u64>,
        role: Mutex<ReplicationRole>,
        restore_fails: bool,
        reset_called: Mutex<bool>,
    }

    #[async_trait]
    impl DatabaseControl for FakeDb {
        async fn start(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn stop(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn initdb(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn reset(&self) -> std::result::Result<(), String> {
            *self.reset_called.lock() = true;
            Ok(())
        }
        async fn backup(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn restore(&self) -> std::result::Result<(), String> {
            if self.restore_fails {
                Err("restore failed".to_string())
            } else {
                Ok(())
            }
        }
        async fn setup_replication(
            &self,
            _primary: Option<&str>,
        ) -> std::result::Result<(), String> {
            *self.role.lock() = ReplicationRole::Replica;
            Ok(())
        }
        async fn stop_replication(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn reload(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn get_database_identifier(&self) -> std::result::Result<String, String> {
            Ok(self.dbid.clone())
        }
        async fn get_timeline(&self) -> std::result::Result<u64, String> {
            Ok(*self.timeline.lock())
        }
        async fn replication_role(&self) -> std::result::Result<ReplicationRole, String> {
            Ok(*self.role.lock())
        }
    }

    fn fake_db(dbid: &str, role: ReplicationRole, restore_fails: bool) -> FakeDb {
        FakeDb {
            dbid: dbid.to_string(),
            timeline: Mutex::new(1),
            role: Mutex::new(role),
            restore_fails,
            reset_called: Mutex::new(false),
        }
    }

    #[tokio::test]
    async fn master_bootstrap_sets_dbid_and_requests_restart() {
        let dcs = FakeDcs {
            lock_attempts_as: "node-a".to_string(),
            ..Default::default()
        };
        let db = fake_db("dbid-x", ReplicationRole::None, false);

        let outcome = master_bootstrap(&dcs, &db).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::RestartAfter(0));
        assert_eq!(dcs.get_dbid().await.unwrap(), Some("dbid-x".to_string()));
    }

    #[tokio::test]
    async fn master_bootstrap_retries_when_dbid_lock_is_held() {
        let dcs = FakeDcs {
            lock_attempts_as: "node-a".to_string(),
            ..Default::default()
        };
        *dcs.dbid_lock.lock() = Some("node-b".to_string());
        let db = fake_db("dbid-x", ReplicationRole::None, false);

        let outcome = master_bootstrap(&dcs, &db).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::RestartAfter(5));
    }

    #[tokio::test]
    async fn replica_bootstrap_resets_and_fails_on_restore_failure() {
        let dcs = FakeDcs::default();
        let db = fake_db("dbid-x", ReplicationRole::None, true);

        let outcome = replica_bootstrap(&dcs, &db).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Fatal(FATAL_BOOTSTRAP_EXIT_CODE));
        assert!(*db.reset_called.lock());
    }

    #[tokio::test]
    async fn replica_bootstrap_succeeds_when_roles_and_dbid_match() {
        let dcs = FakeDcs::default();
        *dcs.dbid.lock() = Some("dbid-x".to_string());
        let db = fake_db("dbid-x", ReplicationRole::None, false);

        let outcome = replica_bootstrap(&dcs, &db).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::ProceedAsReplica);
    }

    #[tokio::test]
    async fn initialize_dispatches_to_master_bootstrap_when_dcs_has_no_dbid() {
        let dcs = FakeDcs {
            lock_attempts_as: "node-a".to_string(),
            ..Default::default()
        };
        let db = fake_db("dbid-x", ReplicationRole::None, false);

        let outcome = initialize(&dcs, &db, "node-a").await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::RestartAfter(0));
    }

    #[tokio::test]
    async fn initialize_proceeds_as_master_when_role_and_lock_match() {
        let dcs = FakeDcs::default();
        *dcs.dbid.lock() = Some("dbid-x".to_string());
        *dcs.master_lock.lock() = Some("node-a".to_string());
        let db = fake_db("dbid-x", ReplicationRole::Master, false);

        let outcome = initialize(&dcs, &db, "node-a").await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::ProceedAsMaster);
    }

    #[tokio::test]
    async fn initialize_resets_and_restarts_when_a_newer_timeline_already_exists() {
        let dcs = FakeDcs::default();
        *dcs.dbid.lock() = Some("dbid-x".to_string());
        *dcs.master_lock.lock() = Some("node-b".to_string());
        *dcs.timeline.lock() = 9;
        let db = fake_db("dbid-x", ReplicationRole::Master, false);

        let outcome = initialize(&dcs, &db, "node-a").await.unwrap();
        // Split-brain risk, not a fatal exit: the supervisor restarts
        // the process and it re-enters as replica next time.
        assert_eq!(outcome, BootstrapOutcome::RestartAfter(5));
        assert!(*db.reset_called.lock());
    }

    #[tokio::test]
    async fn initialize_restarts_without_reset_when_timeline_is_not_newer() {
        let dcs = FakeDcs::default();
        *dcs.dbid.lock() = Some("dbid-x".to_string());
        *dcs.master_lock.lock() = Some("node-b".to_string());
        *dcs.timeline.lock() = 1;
        let db = fake_db("dbid-x", ReplicationRole::Master, false);

        let outcome = initialize(&dcs, &db, "node-a").await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::RestartAfter(5));
        assert!(!*db.reset_called.lock());
    }
}
