//! Failure tracking and escalation policy
//!
//! A modem's recovery level is a pure function of its consecutive failure
//! count against three strictly increasing thresholds. The tracker decides
//! which action (if any) a failing tick should trigger; it never runs
//! anything itself.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Consecutive "configured but disconnected" observations before the first reconnect
pub const TUNNEL_RECONNECT_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub soft: u32,
    pub medium: u32,
    pub hard: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            soft: 3,
            medium: 6,
            hard: 10,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if self.soft == 0 || !(self.soft < self.medium && self.medium < self.hard) {
            bail!(
                "Recovery thresholds must satisfy 1 <= soft < medium < hard (got {}/{}/{})",
                self.soft,
                self.medium,
                self.hard
            );
        }
        Ok(())
    }

    pub fn level(&self, consecutive_failures: u32) -> RecoveryLevel {
        match consecutive_failures {
            0 => RecoveryLevel::Healthy,
            n if n >= self.hard => RecoveryLevel::HardPending,
            n if n >= self.medium => RecoveryLevel::MediumPending,
            n if n >= self.soft => RecoveryLevel::SoftPending,
            _ => RecoveryLevel::Degraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryLevel {
    Healthy,
    Degraded,
    SoftPending,
    MediumPending,
    HardPending,
}

impl RecoveryLevel {
    /// Action owed at this level, if any
    pub fn action(self) -> Option<RecoveryAction> {
        match self {
            RecoveryLevel::Healthy | RecoveryLevel::Degraded => None,
            RecoveryLevel::SoftPending => Some(RecoveryAction::Soft),
            RecoveryLevel::MediumPending => Some(RecoveryAction::Medium),
            RecoveryLevel::HardPending => Some(RecoveryAction::Hard),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    Soft,
    Medium,
    Hard,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Soft => write!(f, "soft"),
            RecoveryAction::Medium => write!(f, "medium"),
            RecoveryAction::Hard => write!(f, "hard"),
        }
    }
}

/// What a failing tick should do for one modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below the soft threshold
    Wait,
    Act(RecoveryAction),
    /// Hard attempts used up; log only
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemFailureRecord {
    pub consecutive_failures: u32,
    /// Every action taken, across all levels
    pub recovery_attempts: u32,
    /// Hard actions taken while in HardPending
    pub hard_attempts: u32,
}

/// Per-modem failure counters, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct ModemTracker {
    thresholds: Thresholds,
    max_hard_attempts: u32,
    records: BTreeMap<String, ModemFailureRecord>,
}

impl ModemTracker {
    pub fn new(thresholds: Thresholds, max_hard_attempts: u32) -> Self {
        Self {
            thresholds,
            max_hard_attempts,
            records: BTreeMap::new(),
        }
    }

    pub fn record(&self, id: &str) -> ModemFailureRecord {
        self.records.get(id).copied().unwrap_or_default()
    }

    pub fn level(&self, id: &str) -> RecoveryLevel {
        self.thresholds.level(self.record(id).consecutive_failures)
    }

    /// Count a failing check; the record is created on first failure
    pub fn record_failure(&mut self, id: &str) -> ModemFailureRecord {
        let record = self.records.entry(id.to_string()).or_default();
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        *record
    }

    /// Reset after a passing check, returning the record as it was before
    pub fn record_success(&mut self, id: &str) -> ModemFailureRecord {
        match self.records.get_mut(id) {
            Some(record) => std::mem::take(record),
            None => ModemFailureRecord::default(),
        }
    }

    pub fn escalation(&self, id: &str) -> Escalation {
        let record = self.record(id);
        match self.thresholds.level(record.consecutive_failures).action() {
            None => Escalation::Wait,
            Some(RecoveryAction::Hard) if record.hard_attempts >= self.max_hard_attempts => {
                Escalation::Exhausted
            }
            Some(action) => Escalation::Act(action),
        }
    }

    /// Count an action before it runs, whatever its outcome
    pub fn note_attempt(&mut self, id: &str, action: RecoveryAction) -> ModemFailureRecord {
        let record = self.records.entry(id.to_string()).or_default();
        record.recovery_attempts = record.recovery_attempts.saturating_add(1);
        if action == RecoveryAction::Hard {
            record.hard_attempts = record.hard_attempts.saturating_add(1);
        }
        *record
    }

    pub fn snapshot(&self) -> BTreeMap<String, ModemFailureRecord> {
        self.records.clone()
    }
}

/// What a "configured but not connected" observation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TunnelDecision {
    Wait,
    Reconnect,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelTracker {
    pub check_count: u32,
    pub max_recovery_attempts: u32,
}

impl TunnelTracker {
    pub fn new(max_recovery_attempts: u32) -> Self {
        Self {
            check_count: 0,
            max_recovery_attempts,
        }
    }

    pub fn record_disconnected(&mut self) -> TunnelDecision {
        self.check_count = self.check_count.saturating_add(1);
        let window_end = TUNNEL_RECONNECT_AFTER.saturating_add(self.max_recovery_attempts);
        if self.check_count < TUNNEL_RECONNECT_AFTER {
            TunnelDecision::Wait
        } else if self.check_count < window_end {
            TunnelDecision::Reconnect
        } else {
            TunnelDecision::GiveUp
        }
    }

    pub fn reset(&mut self) {
        self.check_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ModemTracker {
        ModemTracker::new(Thresholds::default(), 3)
    }

    // === Threshold math ===

    #[test]
    fn test_levels_at_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.level(0), RecoveryLevel::Healthy);
        assert_eq!(t.level(1), RecoveryLevel::Degraded);
        assert_eq!(t.level(2), RecoveryLevel::Degraded);
        assert_eq!(t.level(3), RecoveryLevel::SoftPending);
        assert_eq!(t.level(5), RecoveryLevel::SoftPending);
        assert_eq!(t.level(6), RecoveryLevel::MediumPending);
        assert_eq!(t.level(9), RecoveryLevel::MediumPending);
        assert_eq!(t.level(10), RecoveryLevel::HardPending);
        assert_eq!(t.level(u32::MAX), RecoveryLevel::HardPending);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::default().validate().is_ok());
        assert!(Thresholds { soft: 0, medium: 1, hard: 2 }.validate().is_err());
        assert!(Thresholds { soft: 3, medium: 3, hard: 10 }.validate().is_err());
        assert!(Thresholds { soft: 3, medium: 6, hard: 5 }.validate().is_err());
    }

    // === Threshold law ===

    #[test]
    fn test_soft_fires_on_tick_three_not_before() {
        let mut t = tracker();
        t.record_failure("m");
        assert_eq!(t.escalation("m"), Escalation::Wait);
        t.record_failure("m");
        assert_eq!(t.escalation("m"), Escalation::Wait);
        t.record_failure("m");
        assert_eq!(t.escalation("m"), Escalation::Act(RecoveryAction::Soft));
    }

    #[test]
    fn test_soft_refires_until_medium() {
        let mut t = tracker();
        let mut fired = Vec::new();
        for _ in 0..6 {
            t.record_failure("m");
            if let Escalation::Act(action) = t.escalation("m") {
                t.note_attempt("m", action);
                fired.push(action);
            }
        }
        assert_eq!(
            fired,
            vec![
                RecoveryAction::Soft,
                RecoveryAction::Soft,
                RecoveryAction::Soft,
                RecoveryAction::Medium
            ]
        );
        assert_eq!(t.record("m").recovery_attempts, 4);
    }

    // === Hard cap ===

    #[test]
    fn test_hard_cap_stops_actions() {
        let mut t = tracker();
        let mut hard = 0;
        for tick in 1..=15 {
            t.record_failure("m");
            match t.escalation("m") {
                Escalation::Act(RecoveryAction::Hard) => {
                    t.note_attempt("m", RecoveryAction::Hard);
                    hard += 1;
                    assert!((10..=12).contains(&tick), "hard fired on tick {}", tick);
                }
                Escalation::Act(action) => {
                    t.note_attempt("m", action);
                }
                Escalation::Exhausted => assert!(tick >= 13),
                Escalation::Wait => assert!(tick < 3),
            }
        }
        assert_eq!(hard, 3);
        let record = t.record("m");
        assert_eq!(record.consecutive_failures, 15);
        assert_eq!(record.hard_attempts, 3);
        assert_eq!(record.recovery_attempts, 10);
    }

    // === Reset law ===

    #[test]
    fn test_success_resets_and_reports_previous() {
        let mut t = tracker();
        for _ in 0..11 {
            t.record_failure("m");
            if let Escalation::Act(action) = t.escalation("m") {
                t.note_attempt("m", action);
            }
        }
        let previous = t.record_success("m");
        assert_eq!(previous.consecutive_failures, 11);
        assert!(previous.recovery_attempts > 0);
        assert_eq!(t.record("m"), ModemFailureRecord::default());
        assert_eq!(t.level("m"), RecoveryLevel::Healthy);
    }

    #[test]
    fn test_success_on_unknown_modem_is_noop() {
        let mut t = tracker();
        assert_eq!(t.record_success("never-failed"), ModemFailureRecord::default());
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn test_records_are_per_modem() {
        let mut t = tracker();
        t.record_failure("a");
        t.record_failure("a");
        t.record_failure("b");
        assert_eq!(t.record("a").consecutive_failures, 2);
        assert_eq!(t.record("b").consecutive_failures, 1);
        t.record_success("a");
        assert_eq!(t.record("b").consecutive_failures, 1);
    }

    // === Tunnel window ===

    #[test]
    fn test_tunnel_reconnect_window() {
        let mut t = TunnelTracker::new(3);
        let decisions: Vec<_> = (0..7).map(|_| t.record_disconnected()).collect();
        assert_eq!(
            decisions,
            vec![
                TunnelDecision::Wait,
                TunnelDecision::Wait,
                TunnelDecision::Reconnect,
                TunnelDecision::Reconnect,
                TunnelDecision::Reconnect,
                TunnelDecision::GiveUp,
                TunnelDecision::GiveUp,
            ]
        );
        t.reset();
        assert_eq!(t.check_count, 0);
    }

    #[test]
    fn test_tunnel_zero_attempts_never_reconnects() {
        let mut t = TunnelTracker::new(0);
        for _ in 0..5 {
            assert_ne!(t.record_disconnected(), TunnelDecision::Reconnect);
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn thresholds() -> impl Strategy<Value = Thresholds> {
        (1u32..20, 1u32..20, 1u32..20).prop_map(|(soft, g1, g2)| Thresholds {
            soft,
            medium: soft + g1,
            hard: soft + g1 + g2,
        })
    }

    proptest! {
        /// Level never decreases while a modem keeps failing
        #[test]
        fn escalation_is_monotonic(t in thresholds(), ticks in 1usize..80) {
            let mut tracker = ModemTracker::new(t, 2);
            let mut previous = RecoveryLevel::Healthy;
            for _ in 0..ticks {
                tracker.record_failure("m");
                let level = tracker.level("m");
                prop_assert!(level >= previous);
                previous = level;
            }
        }

        /// No action below the soft threshold
        #[test]
        fn nothing_fires_before_soft(t in thresholds()) {
            let mut tracker = ModemTracker::new(t, 2);
            for _ in 1..t.soft {
                tracker.record_failure("m");
                prop_assert_eq!(tracker.escalation("m"), Escalation::Wait);
            }
        }

        /// Any failure history is wiped by one success
        #[test]
        fn one_success_resets(t in thresholds(), failures in 0u32..60, cap in 1u32..5) {
            let mut tracker = ModemTracker::new(t, cap);
            for _ in 0..failures {
                tracker.record_failure("m");
                if let Escalation::Act(action) = tracker.escalation("m") {
                    tracker.note_attempt("m", action);
                }
            }
            let previous = tracker.record_success("m");
            prop_assert_eq!(previous.consecutive_failures, failures);
            prop_assert_eq!(tracker.record("m"), ModemFailureRecord::default());
        }

        /// Hard actions never exceed the cap
        #[test]
        fn hard_attempts_capped(t in thresholds(), extra in 0u32..40, cap in 1u32..5) {
            let mut tracker = ModemTracker::new(t, cap);
            for _ in 0..(t.hard + extra) {
                tracker.record_failure("m");
                if let Escalation::Act(action) = tracker.escalation("m") {
                    tracker.note_attempt("m", action);
                }
            }
            prop_assert!(tracker.record("m").hard_attempts <= cap);
        }
    }
}

/// State machine model for the escalation protocol
#[cfg(test)]
mod state_machine {
    use super::*;
    use stateright::*;

    #[derive(Clone, Debug, Hash, PartialEq)]
    enum Action {
        CheckFails,
        CheckPasses,
    }

    #[derive(Clone, Debug, Hash, PartialEq)]
    struct EscalationState {
        failures: u32,
        attempts: u32,
        hard_attempts: u32,
        last_fired: Option<RecoveryAction>,
    }

    struct EscalationModel {
        thresholds: Thresholds,
        max_hard_attempts: u32,
        max_failures: u32,
    }

    impl Model for EscalationModel {
        type State = EscalationState;
        type Action = Action;

        fn init_states(&self) -> Vec<Self::State> {
            vec![EscalationState {
                failures: 0,
                attempts: 0,
                hard_attempts: 0,
                last_fired: None,
            }]
        }

        fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
            if state.failures < self.max_failures {
                actions.push(Action::CheckFails);
            }
            actions.push(Action::CheckPasses);
        }

        fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
            // Drive the real tracker from the modelled counters
            let mut tracker = ModemTracker::new(self.thresholds, self.max_hard_attempts);
            for _ in 0..state.failures {
                tracker.record_failure("m");
            }
            let record = tracker.records.entry("m".to_string()).or_default();
            record.recovery_attempts = state.attempts;
            record.hard_attempts = state.hard_attempts;

            match action {
                Action::CheckPasses => {
                    tracker.record_success("m");
                    Some(EscalationState {
                        failures: 0,
                        attempts: 0,
                        hard_attempts: 0,
                        last_fired: None,
                    })
                }
                Action::CheckFails => {
                    tracker.record_failure("m");
                    let fired = match tracker.escalation("m") {
                        Escalation::Act(action) => {
                            tracker.note_attempt("m", action);
                            Some(action)
                        }
                        _ => None,
                    };
                    let record = tracker.record("m");
                    Some(EscalationState {
                        failures: record.consecutive_failures,
                        attempts: record.recovery_attempts,
                        hard_attempts: record.hard_attempts,
                        last_fired: fired,
                    })
                }
            }
        }

        fn properties(&self) -> Vec<Property<Self>> {
            vec![
                Property::always("no_action_below_soft", |m: &Self, s: &EscalationState| {
                    s.failures >= m.thresholds.soft || s.last_fired.is_none()
                }),
                Property::always("action_matches_level", |m: &Self, s: &EscalationState| {
                    match s.last_fired {
                        Some(action) => m.thresholds.level(s.failures).action() == Some(action),
                        None => true,
                    }
                }),
                Property::always("hard_attempts_capped", |m: &Self, s: &EscalationState| {
                    s.hard_attempts <= m.max_hard_attempts
                }),
                Property::always("attempts_bounded_by_failures", |_: &Self, s: &EscalationState| {
                    s.attempts <= s.failures
                }),
                Property::sometimes("hard_exhausted", |m: &Self, s: &EscalationState| {
                    s.hard_attempts == m.max_hard_attempts && s.last_fired.is_none() && s.failures > 0
                }),
            ]
        }
    }

    #[test]
    fn test_escalation_state_machine() {
        let model = EscalationModel {
            thresholds: Thresholds { soft: 2, medium: 4, hard: 6 },
            max_hard_attempts: 2,
            max_failures: 10,
        };

        model
            .checker()
            .threads(1)
            .spawn_bfs()
            .join()
            .assert_properties();
    }
}

/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn level_is_monotonic() {
        let soft: u32 = kani::any();
        let medium: u32 = kani::any();
        let hard: u32 = kani::any();
        kani::assume(soft >= 1 && soft < medium && medium < hard);
        let t = Thresholds { soft, medium, hard };

        let n: u32 = kani::any();
        kani::assume(n < u32::MAX);
        kani::assert(t.level(n) <= t.level(n + 1), "level must not drop as failures grow");
    }

    #[kani::proof]
    fn no_action_below_soft() {
        let soft: u32 = kani::any();
        let medium: u32 = kani::any();
        let hard: u32 = kani::any();
        kani::assume(soft >= 1 && soft < medium && medium < hard);
        let t = Thresholds { soft, medium, hard };

        let n: u32 = kani::any();
        kani::assume(n < soft);
        kani::assert(t.level(n).action().is_none(), "no action below soft threshold");
    }
}
