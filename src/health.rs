/// Status HTTP endpoint
/// Exposes the supervisor snapshot to the admin UI and monitoring systems
/// (/health, /ready, /status, /metrics).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::{HealthStatus, SupervisorStatus};
use crate::orchestrator::Supervisor;
use crate::tracker::RecoveryAction;

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// No cycle has completed yet
const NO_CHECK: u8 = u8::MAX;

/// Corrective actions counted by the metrics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Soft,
    Medium,
    Hard,
    Asterisk,
    Tunnel,
}

impl RecoveryKind {
    const ALL: [RecoveryKind; 5] = [
        RecoveryKind::Soft,
        RecoveryKind::Medium,
        RecoveryKind::Hard,
        RecoveryKind::Asterisk,
        RecoveryKind::Tunnel,
    ];

    fn label(self) -> &'static str {
        match self {
            RecoveryKind::Soft => "soft",
            RecoveryKind::Medium => "medium",
            RecoveryKind::Hard => "hard",
            RecoveryKind::Asterisk => "asterisk",
            RecoveryKind::Tunnel => "tunnel",
        }
    }
}

impl From<RecoveryAction> for RecoveryKind {
    fn from(action: RecoveryAction) -> Self {
        match action {
            RecoveryAction::Soft => RecoveryKind::Soft,
            RecoveryAction::Medium => RecoveryKind::Medium,
            RecoveryAction::Hard => RecoveryKind::Hard,
        }
    }
}

const STATUSES: [HealthStatus; 4] = [
    HealthStatus::Ok,
    HealthStatus::Warning,
    HealthStatus::Critical,
    HealthStatus::Error,
];

fn status_index(status: HealthStatus) -> usize {
    match status {
        HealthStatus::Ok => 0,
        HealthStatus::Warning => 1,
        HealthStatus::Critical => 2,
        HealthStatus::Error => 3,
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Cycles by verdict: ok, warning, critical, error
    pub cycles: [u64; 4],
    /// Actions by kind: soft, medium, hard, asterisk, tunnel
    pub recoveries: [u64; 5],
    /// Timestamp of last check (Unix epoch seconds)
    pub last_check_time: u64,
    pub last_overall: Option<HealthStatus>,
}

/// Cycle and recovery counters, updated from the check loop
#[derive(Debug)]
pub struct HealthMetrics {
    cycles: [AtomicU64; 4],
    recoveries: [AtomicU64; 5],
    last_check_time: AtomicU64,
    last_overall: AtomicU8,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            cycles: Default::default(),
            recoveries: Default::default(),
            last_check_time: AtomicU64::new(0),
            last_overall: AtomicU8::new(NO_CHECK),
        }
    }
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed cycle
    pub fn record_cycle(&self, overall: HealthStatus) {
        let index = status_index(overall);
        self.cycles[index].fetch_add(1, Ordering::Relaxed);
        self.last_check_time.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            Ordering::Relaxed,
        );
        self.last_overall.store(index as u8, Ordering::Relaxed);
    }

    /// Record a corrective action (counted when started, not when it succeeds)
    pub fn record_recovery(&self, kind: RecoveryKind) {
        let index = RecoveryKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default();
        self.recoveries[index].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for (slot, counter) in snapshot.cycles.iter_mut().zip(&self.cycles) {
            *slot = counter.load(Ordering::Relaxed);
        }
        for (slot, counter) in snapshot.recoveries.iter_mut().zip(&self.recoveries) {
            *slot = counter.load(Ordering::Relaxed);
        }
        snapshot.last_check_time = self.last_check_time.load(Ordering::Relaxed);
        snapshot.last_overall = STATUSES.get(self.last_overall.load(Ordering::Relaxed) as usize).copied();
        snapshot
    }
}

/// Run the status HTTP server
pub async fn run_health_server(port: u16, supervisor: Arc<Supervisor>, cancel_token: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind status server on port {}: {}", port, e);
            return;
        }
    };

    serve(listener, supervisor, cancel_token).await;
}

async fn serve(listener: TcpListener, supervisor: Arc<Supervisor>, cancel_token: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!("Status server listening on http://{}/status", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let supervisor = supervisor.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &supervisor).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Status server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(socket: &mut tokio::net::TcpStream, supervisor: &Supervisor) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    // Apply timeout to prevent slow-loris attacks
    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);

    // Parse the request line to get the path
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let response = route(path, &supervisor.status(), &supervisor.metrics().snapshot());

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

fn route(path: &str, status: &SupervisorStatus, metrics: &MetricsSnapshot) -> String {
    match path {
        "/health" | "/healthz" | "/health/" => build_health_response(status),
        "/ready" | "/readyz" | "/ready/" => {
            // Ready until a cycle proves otherwise; only critical/error verdicts fail
            let ready = status
                .last_health_check
                .as_ref()
                .map(|r| r.overall <= HealthStatus::Warning)
                .unwrap_or(true);
            build_ready_response(ready)
        }
        "/status" | "/status/" => build_status_response(status),
        "/metrics" => build_metrics_response(metrics),
        _ => build_not_found_response(),
    }
}

fn json_response(status_line: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
    )
}

fn build_health_response(status: &SupervisorStatus) -> String {
    let (overall, last_check) = match &status.last_health_check {
        Some(result) => (result.overall.as_str(), result.timestamp.to_rfc3339()),
        None => ("unknown", String::new()),
    };
    let body = serde_json::json!({
        "status": if status.running { "running" } else { "stopped" },
        "overall": overall,
        "lastCheck": last_check,
    })
    .to_string();
    json_response("200 OK", &body)
}

fn build_ready_response(ready: bool) -> String {
    if ready {
        json_response("200 OK", r#"{"ready":true}"#)
    } else {
        json_response("503 Service Unavailable", r#"{"ready":false}"#)
    }
}

fn build_status_response(status: &SupervisorStatus) -> String {
    match serde_json::to_string(status) {
        Ok(body) => json_response("200 OK", &body),
        Err(e) => {
            warn!("Failed to serialize status: {}", e);
            json_response("500 Internal Server Error", r#"{"error":"serialization failed"}"#)
        }
    }
}

fn build_metrics_response(metrics: &MetricsSnapshot) -> String {
    // Prometheus-compatible metrics format
    let mut body = String::from(
        "# HELP modemguard_cycles_total Health check cycles by overall verdict\n\
         # TYPE modemguard_cycles_total counter\n",
    );
    for (status, count) in STATUSES.iter().zip(metrics.cycles) {
        body.push_str(&format!(
            "modemguard_cycles_total{{overall=\"{}\"}} {}\n",
            status.as_str(),
            count
        ));
    }
    body.push_str(
        "# HELP modemguard_recoveries_total Recovery actions started by kind\n\
         # TYPE modemguard_recoveries_total counter\n",
    );
    for (kind, count) in RecoveryKind::ALL.iter().zip(metrics.recoveries) {
        body.push_str(&format!(
            "modemguard_recoveries_total{{kind=\"{}\"}} {}\n",
            kind.label(),
            count
        ));
    }
    body.push_str(&format!(
        "# HELP modemguard_last_check_timestamp Unix timestamp of last check\n\
         # TYPE modemguard_last_check_timestamp gauge\n\
         modemguard_last_check_timestamp {}\n",
        metrics.last_check_time
    ));

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_not_found_response() -> String {
    json_response("404 Not Found", r#"{"error":"Not Found"}"#)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = HealthStatus> {
        prop_oneof![
            Just(HealthStatus::Ok),
            Just(HealthStatus::Warning),
            Just(HealthStatus::Critical),
            Just(HealthStatus::Error),
        ]
    }

    proptest! {
        /// Cycle counters add up and the last verdict sticks
        #[test]
        fn cycles_count_correctly(verdicts in proptest::collection::vec(any_status(), 1..60)) {
            let metrics = HealthMetrics::new();
            for v in &verdicts {
                metrics.record_cycle(*v);
            }
            let snapshot = metrics.snapshot();
            prop_assert_eq!(snapshot.cycles.iter().sum::<u64>(), verdicts.len() as u64);
            prop_assert_eq!(snapshot.last_overall, verdicts.last().copied());
        }

        /// Content-Length always matches the body
        #[test]
        fn metrics_content_length_matches(cycles in any::<[u64; 4]>(), recoveries in any::<[u64; 5]>()) {
            let response = build_metrics_response(&MetricsSnapshot {
                cycles,
                recoveries,
                last_check_time: 1,
                last_overall: None,
            });
            let (head, body) = response.split_once("\r\n\r\n").unwrap();
            let expected = format!("Content-Length: {}", body.len());
            prop_assert!(head.contains(&expected));
        }
    }
}
