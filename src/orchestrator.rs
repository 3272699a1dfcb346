//! Health check orchestration
//!
//! Coordinates tunnel, engine and modem inspections, feeds the failure
//! trackers, fires recovery actions and publishes one result per cycle.
//!
//! At most one cycle is ever in flight: the trackers live behind an async
//! mutex that a cycle holds from start to finish. Timer ticks that find it
//! taken are skipped; `force_check` waits its turn.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::{CommandExecutor, EngineCli};
use crate::health::{HealthMetrics, RecoveryKind};
use crate::inspect::{AsteriskInspector, InterfaceInspector, ModemInspector};
use crate::model::{
    AsteriskCheck, HealthCheckResult, HealthEvent, HealthStatus, ModemReport, ModemsCheck, SupervisorStatus,
    WireguardCheck,
};
use crate::recovery::{AudioConfigurator, RecoveryExecutor};
use crate::recovery_log::RecoveryLog;
use crate::scheduler::{format_duration, run_scheduler};
use crate::tracker::{Escalation, ModemTracker, RecoveryAction, TunnelDecision, TunnelTracker};
use crate::tunnel::{TunnelProvider, TunnelStatus};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

/// Counters owned by the running cycle
struct CycleState {
    modems: ModemTracker,
    tunnel: TunnelTracker,
}

/// The cycle lock. Counters are published when it is released, including
/// on unwind, so `status()` always matches what the next cycle acts on.
struct CycleGuard {
    state: OwnedMutexGuard<CycleState>,
    supervisor: Arc<Supervisor>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.supervisor.publish(Some(&self.state), None);
    }
}

pub struct Supervisor {
    config: Arc<Config>,
    modems: ModemInspector,
    asterisk: AsteriskInspector,
    interface: InterfaceInspector,
    tunnel: Arc<dyn TunnelProvider>,
    recovery: RecoveryExecutor,
    log: Arc<RecoveryLog>,
    metrics: Arc<HealthMetrics>,
    state: Arc<Mutex<CycleState>>,
    snapshot: RwLock<SupervisorStatus>,
    events: broadcast::Sender<HealthEvent>,
    running: AtomicBool,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        executor: Arc<dyn CommandExecutor>,
        tunnel: Arc<dyn TunnelProvider>,
        log: Arc<RecoveryLog>,
    ) -> Arc<Self> {
        let cli = EngineCli::new(executor, config.asterisk_bin.clone(), config.command_timeout());
        let modems = ModemInspector::new(cli.clone(), config.modem_id_prefix.clone());
        let asterisk = AsteriskInspector::new(cli.clone());
        let interface = InterfaceInspector::new(cli.clone(), config.wg_interface.clone());
        let audio = AudioConfigurator::new(cli.clone(), config.modem_family, config.audio_command_delay());
        let recovery = RecoveryExecutor::new(
            config.clone(),
            cli,
            modems.clone(),
            asterisk.clone(),
            audio,
            log.clone(),
        );

        let state = CycleState {
            modems: ModemTracker::new(config.thresholds, config.max_hard_attempts),
            tunnel: TunnelTracker::new(config.wg_max_recovery_attempts),
        };
        let snapshot = SupervisorStatus {
            enabled: config.monitor_enabled,
            running: false,
            check_interval: config.check_interval_ms,
            modems: state.modems.snapshot(),
            thresholds: config.thresholds,
            wireguard: state.tunnel,
            last_health_check: None,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            config,
            modems,
            asterisk,
            interface,
            tunnel,
            recovery,
            log,
            metrics: Arc::new(HealthMetrics::new()),
            state: Arc::new(Mutex::new(state)),
            snapshot: RwLock::new(snapshot),
            events,
            running: AtomicBool::new(false),
            cancel: std::sync::Mutex::new(None),
        })
    }

    /// Receive one event per sub-check and one `Completed` per cycle
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<HealthMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn log(&self) -> &RecoveryLog {
        &self.log
    }

    pub fn recovery(&self) -> &RecoveryExecutor {
        &self.recovery
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of counters, thresholds and the last result
    pub fn status(&self) -> SupervisorStatus {
        let mut status = self
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        status.running = self.is_running();
        status
    }

    /// Start the periodic loop (first check runs immediately).
    /// Returns None when disabled by configuration or already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.monitor_enabled {
            self.log.warning("Supervisor disabled by configuration, not starting");
            return None;
        }

        let cancel = {
            let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                warn!("Supervisor already running");
                return None;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        self.running.store(true, Ordering::SeqCst);
        self.log.info(format!(
            "Supervisor started, checking every {}",
            format_duration(self.config.check_interval())
        ));

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let period = this.config.check_interval();
            let supervisor = Arc::clone(&this);
            run_scheduler(period, cancel, move || {
                let supervisor = Arc::clone(&supervisor);
                async move {
                    supervisor.scheduled_check().await;
                }
            })
            .await;
        }))
    }

    /// Cancel the timer. A cycle already in flight is allowed to finish.
    pub fn stop(&self) {
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(token) = token {
            token.cancel();
            self.running.store(false, Ordering::SeqCst);
            self.log.info("Supervisor stopped");
        }
    }

    /// Run one cycle out of band, after any cycle in flight
    pub async fn force_check(self: &Arc<Self>) -> HealthCheckResult {
        let guard = Arc::clone(&self.state).lock_owned().await;
        self.execute(guard).await
    }

    /// Returns false when the tick was skipped because a cycle is in flight
    async fn scheduled_check(self: &Arc<Self>) -> bool {
        match Arc::clone(&self.state).try_lock_owned() {
            Ok(guard) => {
                self.execute(guard).await;
                true
            }
            Err(_) => {
                warn!("Previous health check still running, skipping tick");
                false
            }
        }
    }

    /// Run the cycle body in its own task so a panic is contained like an error
    async fn execute(self: &Arc<Self>, guard: OwnedMutexGuard<CycleState>) -> HealthCheckResult {
        let mut cycle = CycleGuard {
            state: guard,
            supervisor: Arc::clone(self),
        };
        let task = tokio::spawn(async move {
            let result = cycle.supervisor.run_cycle(&mut cycle.state).await;
            (result, cycle)
        });

        let (result, cycle) = match task.await {
            Ok((Ok(result), cycle)) => (result, Some(cycle)),
            Ok((Err(e), cycle)) => {
                let message = format!("{:#}", e);
                self.log.error(format!("Health check failed: {}", message));
                (HealthCheckResult::failed(Utc::now(), message), Some(cycle))
            }
            Err(e) => {
                let message = if e.is_panic() {
                    "health check panicked".to_string()
                } else {
                    format!("health check aborted: {}", e)
                };
                self.log.error(format!("Health check failed: {}", message));
                (HealthCheckResult::failed(Utc::now(), message), None)
            }
        };

        self.publish(cycle.as_ref().map(|c| &*c.state), Some(&result));
        drop(cycle);

        self.metrics.record_cycle(result.overall);
        info!("Health check complete: overall={}", result.overall.as_str());
        let _ = self.events.send(HealthEvent::Completed(result.clone()));
        result
    }

    fn publish(&self, state: Option<&CycleState>, result: Option<&HealthCheckResult>) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = state {
            snapshot.modems = state.modems.snapshot();
            snapshot.wireguard = state.tunnel;
        }
        if let Some(result) = result {
            snapshot.last_health_check = Some(result.clone());
        }
    }

    async fn run_cycle(&self, state: &mut CycleState) -> Result<HealthCheckResult> {
        debug!("Starting health check cycle");
        let timestamp = Utc::now();

        let wireguard = self.check_wireguard(&mut state.tunnel).await;
        let _ = self.events.send(HealthEvent::Tunnel(wireguard.clone()));

        let asterisk = self.check_asterisk().await;
        let _ = self.events.send(HealthEvent::Asterisk(asterisk.clone()));

        let modems = self.check_modems(&mut state.modems).await;
        let _ = self.events.send(HealthEvent::Modems(modems.clone()));

        let overall = HealthStatus::aggregate(&[wireguard.status, asterisk.status, modems.status]);

        Ok(HealthCheckResult {
            timestamp,
            overall,
            asterisk: Some(asterisk),
            modems: Some(modems),
            wireguard: Some(wireguard),
            error: None,
        })
    }

    async fn check_wireguard(&self, tracker: &mut TunnelTracker) -> WireguardCheck {
        let mut check = WireguardCheck {
            status: HealthStatus::Ok,
            healthy: true,
            enabled: false,
            configured: false,
            connected: false,
            interface_present: None,
            check_count: tracker.check_count,
            decision: None,
            note: None,
        };

        let status = match self.tunnel.status().await {
            Ok(status) => status,
            Err(e) => {
                // Fail open: a broken probe must not trigger reconnect loops
                warn!("Tunnel status unavailable: {:#}", e);
                check.note = Some(format!("status unavailable: {:#}", e));
                return check;
            }
        };
        let TunnelStatus {
            enabled,
            configured,
            connected,
        } = status;
        check.enabled = enabled;
        check.configured = configured;
        check.connected = connected;

        if !enabled || !configured {
            tracker.reset();
            check.check_count = 0;
            check.note = Some(if enabled { "not configured" } else { "disabled" }.to_string());
            return check;
        }

        if !connected {
            let decision = tracker.record_disconnected();
            let count = tracker.check_count;
            match decision {
                TunnelDecision::Wait => {
                    self.log
                        .warning(format!("WireGuard configured but not connected (check {})", count));
                }
                TunnelDecision::Reconnect => {
                    self.log.warning(format!(
                        "WireGuard not connected for {} checks, attempting reconnect",
                        count
                    ));
                    self.metrics.record_recovery(RecoveryKind::Tunnel);
                    self.recovery.reconnect_tunnel(self.tunnel.as_ref()).await;
                }
                TunnelDecision::GiveUp => {
                    self.log.error(format!(
                        "WireGuard still not connected after {} reconnect attempts, giving up",
                        tracker.max_recovery_attempts
                    ));
                }
            }
            check.status = HealthStatus::Warning;
            check.healthy = false;
            check.check_count = count;
            check.decision = Some(decision);
            return check;
        }

        let present = self.interface.interface_exists().await;
        check.interface_present = Some(present);
        if !present {
            self.log.warning(format!(
                "WireGuard reports connected but interface {} is missing",
                self.config.wg_interface
            ));
            check.status = HealthStatus::Warning;
            check.healthy = false;
            return check;
        }

        if tracker.check_count > 0 {
            self.log
                .ok(format!("WireGuard tunnel {} connected again", self.config.wg_interface));
        }
        tracker.reset();
        check.check_count = 0;
        check
    }

    async fn check_asterisk(&self) -> AsteriskCheck {
        if self.asterisk.check().await {
            return AsteriskCheck {
                status: HealthStatus::Ok,
                alive: true,
                recovery_attempted: false,
                recovered: None,
            };
        }

        self.log.error("Asterisk not responding");
        self.metrics.record_recovery(RecoveryKind::Asterisk);
        let recovered = self.recovery.recover_asterisk().await;

        AsteriskCheck {
            status: HealthStatus::Critical,
            alive: false,
            recovery_attempted: true,
            recovered: Some(recovered),
        }
    }

    async fn check_modems(&self, tracker: &mut ModemTracker) -> ModemsCheck {
        let (ids, live_enumeration) = self.modems.known_ids(&self.config.modem_ids).await;
        if !live_enumeration {
            debug!("Live enumeration empty, using static modem list");
        }

        let mut reports = Vec::with_capacity(ids.len());
        for id in &ids {
            let health = self.modems.inspect(id).await;
            let mut action = None;
            let mut unrecoverable = false;

            if health.ok() {
                let previous = tracker.record_success(id);
                if previous.consecutive_failures > 0 {
                    self.log.ok(format!(
                        "Modem {} recovered after {} failed checks ({} recovery attempts)",
                        id, previous.consecutive_failures, previous.recovery_attempts
                    ));
                }
            } else {
                let record = tracker.record_failure(id);
                self.log.warning(format!(
                    "Modem {} unhealthy: state={}, registered={}, rssi={} ({} consecutive failures)",
                    id, health.state, health.registered, health.rssi, record.consecutive_failures
                ));

                match tracker.escalation(id) {
                    Escalation::Wait => {}
                    Escalation::Act(next) => {
                        let record = tracker.note_attempt(id, next);
                        self.log.info(format!(
                            "Modem {}: {} recovery (attempt {})",
                            id, next, record.recovery_attempts
                        ));
                        self.metrics.record_recovery(RecoveryKind::from(next));
                        self.run_action(id, next).await;
                        action = Some(next);
                    }
                    Escalation::Exhausted => {
                        unrecoverable = true;
                        self.log.error(format!(
                            "Modem {} unrecoverable after {} hard recovery attempts, manual intervention required",
                            id,
                            tracker.record(id).hard_attempts
                        ));
                    }
                }
            }

            let record = tracker.record(id);
            reports.push(ModemReport {
                id: id.clone(),
                state: health.state.clone(),
                registered: health.registered,
                rssi: health.rssi,
                ok: health.ok(),
                consecutive_failures: record.consecutive_failures,
                recovery_attempts: record.recovery_attempts,
                level: tracker.level(id),
                action,
                unrecoverable,
            });
        }

        ModemsCheck {
            status: ModemsCheck::status_for(&reports),
            live_enumeration,
            modems: reports,
        }
    }

    async fn run_action(&self, id: &str, action: RecoveryAction) {
        match action {
            RecoveryAction::Soft => {
                self.recovery.soft(id).await;
            }
            RecoveryAction::Medium => {
                self.recovery.medium(id).await;
            }
            RecoveryAction::Hard => {
                self.recovery.hard(id).await;
            }
        }
    }
}
