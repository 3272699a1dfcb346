//! Health check results and the status snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::inspect::ModemState;
use crate::tracker::{ModemFailureRecord, RecoveryAction, RecoveryLevel, Thresholds, TunnelDecision, TunnelTracker};

/// Verdict for a sub-check or a whole cycle, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
    Error,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Error => "error",
        }
    }

    /// critical if any is critical, else warning if any is warning, else ok
    pub fn aggregate(statuses: &[HealthStatus]) -> HealthStatus {
        statuses.iter().copied().max().unwrap_or(HealthStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsteriskCheck {
    pub status: HealthStatus,
    pub alive: bool,
    pub recovery_attempted: bool,
    /// Outcome of the post-restart re-check
    pub recovered: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemReport {
    pub id: String,
    pub state: ModemState,
    pub registered: bool,
    pub rssi: u32,
    pub ok: bool,
    pub consecutive_failures: u32,
    pub recovery_attempts: u32,
    pub level: RecoveryLevel,
    pub action: Option<RecoveryAction>,
    /// Hard attempts used up; no further action until the modem recovers
    pub unrecoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemsCheck {
    pub status: HealthStatus,
    /// Ids came from live enumeration rather than the static list
    pub live_enumeration: bool,
    pub modems: Vec<ModemReport>,
}

impl ModemsCheck {
    /// warning when any modem fails; critical when one is at the hard tier, or
    /// when none works and the outage has reached the soft threshold
    pub fn status_for(modems: &[ModemReport]) -> HealthStatus {
        if modems.is_empty() {
            return HealthStatus::Warning;
        }
        let failing = modems.iter().filter(|m| !m.ok).count();
        let hard = modems.iter().any(|m| m.level == RecoveryLevel::HardPending);
        let persistent = modems.iter().any(|m| m.level >= RecoveryLevel::SoftPending);
        if hard || (failing == modems.len() && persistent) {
            HealthStatus::Critical
        } else if failing > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireguardCheck {
    pub status: HealthStatus,
    pub healthy: bool,
    pub enabled: bool,
    pub configured: bool,
    pub connected: bool,
    /// Only inspected when the provider reports a connection
    pub interface_present: Option<bool>,
    pub check_count: u32,
    pub decision: Option<TunnelDecision>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    pub asterisk: Option<AsteriskCheck>,
    pub modems: Option<ModemsCheck>,
    pub wireguard: Option<WireguardCheck>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn failed(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            overall: HealthStatus::Error,
            asterisk: None,
            modems: None,
            wireguard: None,
            error: Some(message.into()),
        }
    }
}

/// One notification per health outcome
#[derive(Debug, Clone)]
pub enum HealthEvent {
    Tunnel(WireguardCheck),
    Asterisk(AsteriskCheck),
    Modems(ModemsCheck),
    Completed(HealthCheckResult),
}

/// Point-in-time copy of the supervisor's state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub enabled: bool,
    pub running: bool,
    /// Milliseconds
    pub check_interval: u64,
    pub modems: BTreeMap<String, ModemFailureRecord>,
    pub thresholds: Thresholds,
    pub wireguard: TunnelTracker,
    pub last_health_check: Option<HealthCheckResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, ok: bool, level: RecoveryLevel) -> ModemReport {
        ModemReport {
            id: id.to_string(),
            state: if ok { ModemState::Free } else { ModemState::Unknown },
            registered: ok,
            rssi: if ok { 20 } else { 0 },
            ok,
            consecutive_failures: 0,
            recovery_attempts: 0,
            level,
            action: None,
            unrecoverable: false,
        }
    }

    #[test]
    fn test_aggregate() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::aggregate(&[]), Ok);
        assert_eq!(HealthStatus::aggregate(&[Ok, Ok]), Ok);
        assert_eq!(HealthStatus::aggregate(&[Ok, Warning]), Warning);
        assert_eq!(HealthStatus::aggregate(&[Warning, Critical, Ok]), Critical);
    }

    #[test]
    fn test_modems_status() {
        assert_eq!(ModemsCheck::status_for(&[]), HealthStatus::Warning);
        assert_eq!(
            ModemsCheck::status_for(&[report("a", true, RecoveryLevel::Healthy)]),
            HealthStatus::Ok
        );
        assert_eq!(
            ModemsCheck::status_for(&[
                report("a", true, RecoveryLevel::Healthy),
                report("b", false, RecoveryLevel::Degraded)
            ]),
            HealthStatus::Warning
        );
        // A transient failure below the soft threshold is only a warning
        assert_eq!(
            ModemsCheck::status_for(&[report("a", false, RecoveryLevel::Degraded)]),
            HealthStatus::Warning
        );
        assert_eq!(
            ModemsCheck::status_for(&[report("a", false, RecoveryLevel::SoftPending)]),
            HealthStatus::Critical
        );
        assert_eq!(
            ModemsCheck::status_for(&[
                report("a", false, RecoveryLevel::Degraded),
                report("b", false, RecoveryLevel::MediumPending)
            ]),
            HealthStatus::Critical
        );
        assert_eq!(
            ModemsCheck::status_for(&[
                report("a", true, RecoveryLevel::Healthy),
                report("b", false, RecoveryLevel::MediumPending)
            ]),
            HealthStatus::Warning
        );
        assert_eq!(
            ModemsCheck::status_for(&[
                report("a", true, RecoveryLevel::Healthy),
                report("b", false, RecoveryLevel::HardPending)
            ]),
            HealthStatus::Critical
        );
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = SupervisorStatus {
            enabled: true,
            running: false,
            check_interval: 30_000,
            modems: BTreeMap::new(),
            thresholds: Thresholds::default(),
            wireguard: TunnelTracker::new(3),
            last_health_check: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"checkInterval\":30000"));
        assert!(json.contains("\"thresholds\":{\"soft\":3,\"medium\":6,\"hard\":10}"));
        assert!(json.contains("\"wireguard\":{\"checkCount\":0,\"maxRecoveryAttempts\":3}"));
        assert!(json.contains("\"lastHealthCheck\":null"));
    }

    #[test]
    fn test_failed_result_serializes_error() {
        let result = HealthCheckResult::failed(Utc::now(), "boom");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"overall\":\"error\""));
        assert!(json.contains("\"error\":\"boom\""));
    }
}
