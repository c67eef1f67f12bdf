// src/takeover.rs

//! The takeover engine: races for the master lock when eligible, and
//! drives the unhealthy-master handler that relinquishes it when this
//! node can no longer serve.

use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::warn;

use crate::capability::dcs::{DcsAdapter, LockResult};
use crate::capability::plugins::ReplicaRanker;
use crate::error::{DeadmanError, Result};
use crate::state::is_eligible_willing;

/// How long `_try_takeover` waits, in ticks, before checking lock
/// ownership — gives peers a chance to refresh their willingness.
pub const TAKEOVER_PRE_SLEEP_TICKS: u32 = 3;

/// Ticks the unhealthy-master handler waits between re-checks when no
/// willing replica is yet visible.
pub const UNHEALTHY_MASTER_POLL_TICKS: u32 = 30;

/// Ticks the unhealthy-master handler requests via `restart()` once a
/// willing replica becomes visible, relinquishing the lock.
pub const UNHEALTHY_MASTER_RESTART_TICKS: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeoverOutcome {
    Acquired,
    AbortedLockTaken,
    AbortedNotAmongBest { best: Vec<String> },
    AbortedNoLongerWilling,
    LostRace,
}

/// Runs `_try_takeover` (§4.5, steps 1-6), looping until the lock is
/// acquired or lost, or this node gives up being willing. Being
/// passed over for a better-ranked replica does not end the attempt:
/// it sleeps and re-checks, so a cluster where every replica starts
/// out ineligible (e.g. all still under the age gate) still converges
/// on a master once the gate clears, rather than leaving the lock
/// vacant forever.
///
/// `now_unix` and `still_willing` are injected rather than read from a
/// global clock/state so each iteration stays a pure function of its
/// inputs and is unit-testable without a real DCS or timer.
pub async fn try_takeover(
    dcs: &dyn DcsAdapter,
    ranker: &dyn ReplicaRanker,
    my_id: &str,
    tick_time: Duration,
    now_unix: impl Fn() -> u64,
    still_willing: impl Fn() -> bool,
) -> Result<TakeoverOutcome> {
    loop {
        sleep(tick_time * TAKEOVER_PRE_SLEEP_TICKS).await;

        if dcs
            .lock_owner("master")
            .await
            .map_err(DeadmanError::Dcs)?
            .is_some()
        {
            return Ok(TakeoverOutcome::AbortedLockTaken);
        }

        let peers = dcs.list_state().await.map_err(DeadmanError::Dcs)?;
        let now = now_unix();
        let eligible: Vec<String> = peers
            .into_iter()
            .filter(|peer| {
                let willing = peer
                    .state
                    .get("willing")
                    .and_then(|v| v.as_i64())
                    .map(|v| v as u64);
                is_eligible_willing(willing, now)
            })
            .map(|peer| peer.my_id)
            .collect();

        let best = ranker.best_replicas(&eligible);
        if !best.iter().any(|id| id == my_id) {
            warn!(best = ?best, my_id, "not among the best willing replicas, retrying after another sleep");
            continue;
        }

        if !still_willing() {
            return Ok(TakeoverOutcome::AbortedNoLongerWilling);
        }

        match dcs.lock("master").await.map_err(DeadmanError::Dcs)? {
            LockResult::Acquired => return Ok(TakeoverOutcome::Acquired),
            LockResult::HeldByOther => return Ok(TakeoverOutcome::LostRace),
        }
    }
}

/// Guards the unhealthy-master handler so concurrent invocations
/// short-circuit (§4.5, §5): only one run is ever in flight.
pub struct UnhealthyMasterHandler {
    guard: AsyncMutex<()>,
}

impl Default for UnhealthyMasterHandler {
    fn default() -> Self {
        UnhealthyMasterHandler {
            guard: AsyncMutex::new(()),
        }
    }
}

impl UnhealthyMasterHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the handler loop. A concurrent call while one is already
    /// running is a no-op (returns immediately without iterating).
    ///
    /// `still_unhealthy` and `willing_replica_visible` are polled once
    /// per tick; `restart` is invoked with the ticks to relinquish the
    /// lock for once a willing replica appears.
    pub async fn run(
        &self,
        tick_time: Duration,
        still_unhealthy: impl Fn() -> bool,
        willing_replica_visible: impl Fn() -> bool,
        restart: impl Fn(u32),
    ) {
        let Ok(_permit) = self.guard.try_lock() else {
            return;
        };
        while still_unhealthy() {
            if willing_replica_visible() {
                restart(UNHEALTHY_MASTER_RESTART_TICKS);
                return;
            }
            sleep(tick_time * UNHEALTHY_MASTER_POLL_TICKS).await;
        }
    }
}
