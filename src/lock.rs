// src/lock.rs

//! Reacts to master-lock ownership changes delivered by the DCS adapter
//! (§4.5's "On lock-owner change" rules).

use crate::capability::database::{DatabaseControl, ReplicationRole};
use crate::error::{DeadmanError, Result};

/// What happened as a result of an observed lock-owner change. Callers
/// (the agent loop) translate this into state-document updates and,
/// for `SplitBrainRestart`/`TakeoverEligible`, further action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockChangeOutcome {
    /// This node now holds the lock and has been promoted; the caller
    /// must publish the new timeline and `replication_role = master`.
    BecameMaster { new_timeline: u64 },
    /// Someone else holds the lock while we still believe we're
    /// master: a split-brain risk. The caller must call
    /// `restart(ticks)` immediately.
    SplitBrainRestart { ticks: u32 },
    /// The lock is vacant; the caller should schedule a takeover
    /// attempt.
    TakeoverEligible,
    /// No action required (e.g. a peer took the lock and we were
    /// already a replica).
    NoOp,
}

/// The split-brain guard's restart interval, in ticks (§4.5).
pub const SPLIT_BRAIN_RESTART_TICKS: u32 = 10;

pub async fn on_lock_owner_changed(
    owner: Option<&str>,
    my_id: &str,
    current_role: ReplicationRole,
    db: &dyn DatabaseControl,
) -> Result<LockChangeOutcome> {
    match owner {
        Some(holder) if holder == my_id => {
            if current_role == ReplicationRole::Replica {
                db.stop_replication()
                    .await
                    .map_err(DeadmanError::Database)?;
            }
            let role_after = db.replication_role().await.map_err(DeadmanError::Database)?;
            if role_after != ReplicationRole::Master {
                return Err(DeadmanError::InvariantViolation(
                    "I should have become master already".to_string(),
                ));
            }
            let timeline = db.get_timeline().await.map_err(DeadmanError::Database)?;
            let new_timeline = timeline + 1;
            Ok(LockChangeOutcome::BecameMaster { new_timeline })
        }
        Some(_other) => {
            if current_role == ReplicationRole::Master {
                Ok(LockChangeOutcome::SplitBrainRestart {
                    ticks: SPLIT_BRAIN_RESTART_TICKS,
                })
            } else {
                Ok(LockChangeOutcome::NoOp)
            }
        }
        None => Ok(LockChangeOutcome::TakeoverEligible),
    }
}
