// src/agent.rs

//! The agent loop: orchestrates bootstrap/initialize, owns the agent's
//! mutable state behind a single lock, reacts to DCS callbacks, and
//! drives restart/backoff (§4.7).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::bootstrap::{self, BootstrapOutcome};
use crate::capability::database::ReplicationRole;
use crate::capability::dcs::{DcsAdapter, DcsCallbacks, LockResult, PeerState, SessionEvent};
use crate::capability::plugins::AgentHandle;
use crate::capability::{CapabilityRegistry, DatabaseControl};
use crate::document::Document;
use crate::health::{HealthTracker, HealthTransition, INITIALIZE_KEY};
use crate::lock::{self, LockChangeOutcome};
use crate::state::{StatePublisher, WillingnessInputs, is_eligible_willing};
use crate::takeover::{self, TakeoverOutcome, UnhealthyMasterHandler};

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct AgentState {
    my_id: String,
    role: ReplicationRole,
    health: HealthTracker,
    publisher: StatePublisher,
    lock_owner: Option<String>,
    peers: Vec<PeerState>,
    exit_code: i32,
}

pub struct Agent {
    capabilities: CapabilityRegistry,
    state: Mutex<AgentState>,
    tasks: Mutex<JoinSet<()>>,
    tick_time: Duration,
    shutdown: Notify,
    self_weak: Weak<Agent>,
    /// Counts `on_state_changed` deliveries where this node's own id
    /// came back holding state it didn't write. Production code only
    /// needs the `error!` log; tests assert against this counter so a
    /// regression in the detection path actually fails the test.
    duplicate_id_detections: AtomicU32,
}

impl Agent {
    pub fn new(capabilities: CapabilityRegistry, tick_time: Duration) -> crate::error::Result<Arc<Self>> {
        capabilities.validate()?;
        let my_id = capabilities
            .identity
            .as_ref()
            .expect("validated above")
            .my_id();

        Ok(Arc::new_cyclic(|weak| Agent {
            capabilities,
            state: Mutex::new(AgentState {
                my_id,
                role: ReplicationRole::None,
                health: HealthTracker::new(),
                publisher: StatePublisher::new(),
                lock_owner: None,
                peers: Vec::new(),
                exit_code: 0,
            }),
            tasks: Mutex::new(JoinSet::new()),
            tick_time,
            shutdown: Notify::new(),
            self_weak: weak.clone(),
            duplicate_id_detections: AtomicU32::new(0),
        }))
    }

    /// Lets integration tests end a `run()` call that is blocked on
    /// the steady-state event loop without going through a full
    /// `restart()` (no real process to terminate in-test).
    #[cfg(any(test, feature = "testing"))]
    pub fn request_shutdown_for_tests(&self) {
        self.shutdown.notify_waiters();
    }

    /// Number of times `on_state_changed` has observed this node's own
    /// id reporting state it didn't write (see `duplicate_id_detections`).
    #[cfg(any(test, feature = "testing"))]
    pub fn duplicate_id_detections_for_tests(&self) -> u32 {
        self.duplicate_id_detections.load(Ordering::SeqCst)
    }

    fn dcs(&self) -> Arc<dyn DcsAdapter> {
        self.capabilities.dcs.clone().expect("validated at startup")
    }

    fn database(&self) -> Arc<dyn DatabaseControl> {
        self.capabilities
            .database
            .clone()
            .expect("validated at startup")
    }

    fn my_id(&self) -> String {
        self.state.lock().my_id.clone()
    }

    /// `run()` → `initialize()`; proceeds to the steady-state loop or
    /// restarts, per §4.7.
    pub async fn run(self: &Arc<Self>) -> i32 {
        self.state
            .lock()
            .health
            .mark_unhealthy(INITIALIZE_KEY, "bootstrapping", true);

        let my_id = self.my_id();
        let outcome = bootstrap::initialize(self.dcs().as_ref(), self.database().as_ref(), &my_id).await;

        match outcome {
            Ok(BootstrapOutcome::ProceedAsMaster) => {
                self.state.lock().role = ReplicationRole::Master;
                self.enter_steady_state().await;
                self.state.lock().exit_code
            }
            Ok(BootstrapOutcome::ProceedAsReplica) => {
                self.state.lock().role = ReplicationRole::Replica;
                self.enter_steady_state().await;
                self.state.lock().exit_code
            }
            Ok(BootstrapOutcome::RestartAfter(ticks)) => {
                self.do_restart(ticks).await;
                self.state.lock().exit_code
            }
            Ok(BootstrapOutcome::Fatal(code)) => {
                self.capabilities
                    .process_control
                    .as_ref()
                    .expect("validated at startup")
                    .terminate(code);
                code
            }
            Err(e) => {
                error!(error = %e, "bootstrap failed with an unhandled error");
                self.state.lock().exit_code = 1;
                self.do_restart(10).await;
                1
            }
        }
    }

    async fn enter_steady_state(self: &Arc<Self>) {
        let callbacks: Arc<dyn DcsCallbacks> = self.clone();
        if let Err(e) = self.dcs().watch(callbacks).await {
            error!(error = %e, "failed to install dcs watches");
            self.do_restart(10).await;
            return;
        }

        let conn_info = self.collect_conn_info();
        if let Err(e) = self.dcs().set_conn_info(&conn_info).await {
            error!(error = %e, "failed to publish connection info");
        }
        {
            let mut state = self.state.lock();
            state.publisher.seed_conn_info(&conn_info);
            state.health.mark_healthy(INITIALIZE_KEY);
        }
        self.publish_state().await;

        let still_unhealthy_after_init = !self.state.lock().health.is_healthy();
        if still_unhealthy_after_init && self.state.lock().role == ReplicationRole::Master {
            self.spawn_delayed_unhealthy_master_handler(300);
        }

        self.spawn_monitors();
        self.shutdown.notified().await;
    }

    fn spawn_monitors(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        for monitor in self.capabilities.monitors.iter().cloned() {
            let agent = self.clone();
            let tick_time = self.tick_time;
            tasks.spawn(async move {
                loop {
                    monitor.check(agent.as_ref());
                    tokio::time::sleep(tick_time).await;
                }
            });
        }
    }

    fn collect_conn_info(&self) -> Document {
        let mut doc = Document::new();
        for provider in &self.capabilities.conn_info_providers {
            let contributed = provider.conn_info();
            let shadowed = doc.merge(&contributed);
            for key in shadowed {
                warn!(provider = provider.name(), key, "conn-info key shadowed by a later provider");
            }
        }
        doc
    }

    async fn publish_state(&self) {
        let now = now_unix();

        let problems_value = {
            let state = self.state.lock();
            let mut map = serde_json::Map::new();
            for (key, problem) in state.health.problems() {
                let mut inner = serde_json::Map::new();
                inner.insert("reason".into(), serde_json::Value::from(problem.reason.clone()));
                inner.insert(
                    "can_be_replica".into(),
                    serde_json::Value::from(problem.can_be_replica),
                );
                map.insert(key.clone(), serde_json::Value::Object(inner));
            }
            serde_json::Value::Object(map)
        };

        let mut update = Document::new();
        update.insert("health_problems", problems_value);

        let role_str = match self.state.lock().role {
            ReplicationRole::Master => Some("master"),
            ReplicationRole::Replica => Some("replica"),
            ReplicationRole::None => None,
        };
        if let Some(role_str) = role_str {
            update.insert("replication_role", role_str);
        }

        let veto_active = self
            .capabilities
            .any_veto_active()
            .iter()
            .any(|(_, vetoed)| *vetoed);

        let to_write = {
            let mut state = self.state.lock();
            let willingness = WillingnessInputs {
                healthy: state.health.is_healthy(),
                is_replica: state.role == ReplicationRole::Replica,
                veto_active,
            };
            let suppress = state.health.contains(INITIALIZE_KEY);
            state.publisher.update(update, willingness, now, suppress)
        };

        if let Some(doc) = to_write
            && let Err(e) = self.dcs().set_state(&doc).await
        {
            error!(error = %e, "failed to publish state document");
        }
    }

    fn any_willing_replica_visible(&self) -> bool {
        let now = now_unix();
        let state = self.state.lock();
        state.peers.iter().any(|peer| {
            let willing = peer
                .state
                .get("willing")
                .and_then(|v| v.as_i64())
                .map(|v| v as u64);
            is_eligible_willing(willing, now)
        })
    }

    fn spawn_unhealthy_master_handler(self: &Arc<Self>) {
        let for_unhealthy = self.clone();
        let for_visible = self.clone();
        let for_restart = self.clone();
        let tick_time = self.tick_time;
        self.tasks.lock().spawn(async move {
            let handler = UnhealthyMasterHandler::new();
            handler
                .run(
                    tick_time,
                    move || !for_unhealthy.state.lock().health.is_healthy(),
                    move || for_visible.any_willing_replica_visible(),
                    move |ticks| {
                        let agent = for_restart.clone();
                        tokio::spawn(async move { agent.do_restart(ticks).await });
                    },
                )
                .await;
        });
    }

    fn spawn_delayed_unhealthy_master_handler(self: &Arc<Self>, delay_ticks: u32) {
        let agent = self.clone();
        let tick_time = self.tick_time;
        self.tasks.lock().spawn(async move {
            tokio::time::sleep(tick_time * delay_ticks).await;
            if !agent.state.lock().health.is_healthy() {
                agent.spawn_unhealthy_master_handler();
            }
        });
    }

    fn spawn_takeover_attempt(self: &Arc<Self>) {
        let agent = self.clone();
        self.tasks.lock().spawn(async move {
            let my_id = agent.my_id();
            let dcs = agent.dcs();
            let Some(ranker) = agent.capabilities.replica_ranker.clone() else {
                return;
            };
            let tick_time = agent.tick_time;
            let still_willing_agent = agent.clone();

            let result = takeover::try_takeover(
                dcs.as_ref(),
                ranker.as_ref(),
                &my_id,
                tick_time,
                now_unix,
                move || still_willing_agent.state.lock().publisher.willing_since().is_some(),
            )
            .await;

            match result {
                Ok(TakeoverOutcome::Acquired) => {
                    info!("acquired the master lock, awaiting lock-owner callback");
                }
                Ok(outcome) => {
                    info!(?outcome, "takeover attempt did not result in a lock acquisition");
                }
                Err(e) => error!(error = %e, "takeover attempt failed"),
            }
        });
    }

    async fn handle_lock_owner_changed(self: &Arc<Self>, owner: Option<String>) {
        let (my_id, role) = {
            let mut state = self.state.lock();
            state.lock_owner = owner.clone();
            (state.my_id.clone(), state.role)
        };

        match lock::on_lock_owner_changed(owner.as_deref(), &my_id, role, self.database().as_ref()).await
        {
            Ok(LockChangeOutcome::BecameMaster { new_timeline }) => {
                if let Err(e) = self.dcs().set_timeline(new_timeline).await {
                    error!(error = %e, "failed to publish new timeline after becoming master");
                }
                self.state.lock().role = ReplicationRole::Master;
                self.publish_state().await;
            }
            Ok(LockChangeOutcome::SplitBrainRestart { ticks }) => {
                warn!("split-brain risk: another node holds the master lock while we believe we are master");
                self.do_restart(ticks).await;
            }
            Ok(LockChangeOutcome::TakeoverEligible) => {
                self.spawn_takeover_attempt();
            }
            Ok(LockChangeOutcome::NoOp) => {}
            Err(e) => error!(error = %e, "error reacting to lock owner change"),
        }
    }

    async fn handle_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Suspended => {
                tokio::time::sleep(self.tick_time).await;
                self.state
                    .lock()
                    .health
                    .mark_unhealthy("dcs.no_connection", "session suspended", true);
                self.publish_state().await;
            }
            SessionEvent::Connected => {
                self.state.lock().health.mark_healthy("dcs.no_connection");
                self.publish_state().await;
            }
            SessionEvent::Lost => {
                warn!("dcs session lost, restarting");
                self.do_restart(10).await;
            }
        }
    }

    async fn on_became_unhealthy(self: &Arc<Self>) {
        let role = self.state.lock().role;
        match role {
            ReplicationRole::Master => self.spawn_unhealthy_master_handler(),
            ReplicationRole::Replica => {
                let blocks_replica = self.state.lock().health.has_replica_blocking_problem();
                if blocks_replica && let Err(e) = self.dcs().delete_conn_info().await {
                    error!(error = %e, "failed to delete conn info for a non-replica-capable node");
                }
            }
            ReplicationRole::None => {}
        }
        self.publish_state().await;
    }

    async fn on_became_healthy(self: &Arc<Self>) {
        let role = self.state.lock().role;
        if role == ReplicationRole::Master {
            match self.dcs().lock("master").await {
                Ok(LockResult::Acquired) => {}
                Ok(LockResult::HeldByOther) => {
                    self.do_restart(10).await;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "failed to reassert the master lock after recovering");
                    self.do_restart(10).await;
                    return;
                }
            }
        }
        let conn_info = self.collect_conn_info();
        if let Err(e) = self.dcs().set_conn_info(&conn_info).await {
            error!(error = %e, "failed to republish connection info after recovering");
        }
        self.publish_state().await;
    }

    /// `restart(t)`: stop the database if master, disconnect the DCS
    /// session, sleep (blocking the whole agent, deliberately) for
    /// `t * tick_time`, then terminate the process (§4.7, §5).
    async fn do_restart(&self, ticks: u32) {
        let role = self.state.lock().role;
        if role == ReplicationRole::Master
            && let Err(e) = self.database().stop().await
        {
            error!(error = %e, "failed to stop database during restart");
        }
        if let Err(e) = self.dcs().disconnect().await {
            error!(error = %e, "failed to disconnect dcs session during restart");
        }

        self.tasks.lock().abort_all();
        self.shutdown.notify_waiters();

        let sleep_duration = self.tick_time * ticks;
        tokio::time::sleep(sleep_duration).await;

        let exit_code = self.state.lock().exit_code;
        self.capabilities
            .process_control
            .as_ref()
            .expect("validated at startup")
            .terminate(exit_code);
    }
}

impl DcsCallbacks for Agent {
    fn on_master_lock_changed(&self, owner: Option<String>) {
        if let Some(agent) = self.self_weak.upgrade() {
            tokio::spawn(async move { agent.handle_lock_owner_changed(owner).await });
        }
    }

    fn on_state_changed(&self, peers: Vec<PeerState>) {
        let mut state = self.state.lock();
        if let Some(mine) = peers.iter().find(|peer| peer.my_id == state.my_id)
            && state.publisher.observe_reported_state(&mine.state)
        {
            self.duplicate_id_detections.fetch_add(1, Ordering::SeqCst);
            error!(
                my_id = %state.my_id,
                "observed a second concurrent writer using this node's id; another process may be running with the same identity"
            );
        }
        state.peers = peers;
    }

    fn on_conn_info_changed(&self, _peers: Vec<PeerState>) {}

    fn on_session_event(&self, event: SessionEvent) {
        if let Some(agent) = self.self_weak.upgrade() {
            tokio::spawn(async move { agent.handle_session_event(event).await });
        }
    }
}

impl AgentHandle for Agent {
    fn mark_unhealthy(&self, key: &str, reason: &str, can_be_replica: bool) {
        let transition = self.state.lock().health.mark_unhealthy(key, reason, can_be_replica);
        if let Some(agent) = self.self_weak.upgrade() {
            tokio::spawn(async move {
                if matches!(transition, HealthTransition::BecameUnhealthy { .. }) {
                    agent.on_became_unhealthy().await;
                } else {
                    agent.publish_state().await;
                }
            });
        }
    }

    fn mark_healthy(&self, key: &str) {
        let transition = self.state.lock().health.mark_healthy(key);
        if let Some(agent) = self.self_weak.upgrade() {
            tokio::spawn(async move {
                if transition == HealthTransition::BecameHealthy {
                    agent.on_became_healthy().await;
                } else {
                    agent.publish_state().await;
                }
            });
        }
    }

    fn restart(&self, ticks: u32) {
        if let Some(agent) = self.self_weak.upgrade() {
            tokio::spawn(async move { agent.do_restart(ticks).await });
        }
    }

    fn pg_connect_info(&self) -> Document {
        self.collect_conn_info()
    }
}
