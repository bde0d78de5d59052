//! Remediation Policy
//!
//! Pure decision function over one unit's latest reading:
//!
//! - **restart** once the failing streak reaches `restart_threshold`
//! - **recreate** once it reaches `recreate_threshold` and a restart has
//!   already been tried (and failed, or had its cooldown run out)
//! - **scale** a scalable unit whose load stayed above the watermark
//! - **none** otherwise, with the rule that held it back
//!
//! Nothing here touches the runtime or the clock; `now` comes in with the
//! input so decisions are reproducible.

mod fault;
mod history;
mod load;

pub use fault::{apply_mode, FaultMode, FaultOverride};
pub use history::RemediationHistory;
pub use load::{track_elevated, LoadSignal, NoLoadSignal, ReportedLoad};

use chrono::{DateTime, Duration, Utc};

use crate::config::PolicyConfig;
use crate::types::{
    ActionKind, DecisionReason, HealthSnapshot, HealthState, MonitoredUnit, RemediationAction,
};

/// Everything `decide` looks at.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub unit: &'a MonitoredUnit,
    /// Raw reading from the runtime
    pub current: &'a HealthSnapshot,
    /// Previous effective snapshot
    pub prior: Option<&'a HealthSnapshot>,
    /// Active fault override, if any
    pub mode: Option<FaultMode>,
    pub history: &'a RemediationHistory,
    /// History of the service the unit scales with; scale cooldowns are
    /// shared by every replica
    pub scale_history: Option<&'a RemediationHistory>,
    /// Consecutive polls with the service's load at or above the watermark
    pub elevated_polls: u32,
    pub now: DateTime<Utc>,
}

/// Decision rules parameterised by [`PolicyConfig`].
#[derive(Debug, Clone)]
pub struct RemediationPolicy {
    config: PolicyConfig,
}

impl RemediationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn fault_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.fault_override_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Effective snapshot after any fault override.
    pub fn classify(
        &self,
        current: &HealthSnapshot,
        prior: Option<&HealthSnapshot>,
        mode: Option<FaultMode>,
    ) -> HealthSnapshot {
        apply_mode(current, prior, mode)
    }

    /// Advance the elevated-load counter by one poll.
    pub fn track_load(&self, previous: u32, value: Option<f64>) -> u32 {
        track_elevated(previous, value, self.config.load_high_watermark)
    }

    pub fn decide(&self, input: &DecisionInput<'_>) -> RemediationAction {
        let snapshot = self.classify(input.current, input.prior, input.mode);
        let unit_id = input.unit.id.as_str();

        match snapshot.health_state {
            HealthState::Unhealthy => self.decide_unhealthy(input, &snapshot),
            HealthState::Unknown if snapshot.ambiguous => {
                RemediationAction::none(unit_id, DecisionReason::AmbiguousReading)
            }
            HealthState::Unknown => RemediationAction::none(unit_id, DecisionReason::UnknownHealth),
            state => self.decide_scale(input).unwrap_or_else(|| {
                let reason = match state {
                    HealthState::Starting => DecisionReason::Starting,
                    HealthState::None => DecisionReason::NoHealthCheck,
                    _ => DecisionReason::Healthy,
                };
                RemediationAction::none(unit_id, reason)
            }),
        }
    }

    fn decide_unhealthy(&self, input: &DecisionInput<'_>, snapshot: &HealthSnapshot) -> RemediationAction {
        let unit_id = input.unit.id.as_str();
        let history = input.history;
        let streak = snapshot.failing_streak;
        let in_cooldown = history.in_cooldown(&self.config, input.now);

        if streak < self.config.restart_threshold {
            return RemediationAction::none(unit_id, DecisionReason::BelowRestartThreshold);
        }

        // Recreate only ever follows a restart that did not bring the unit back.
        if streak >= self.config.recreate_threshold && history.restarts_attempted > 0 {
            let recreate_cooling = history.last_action == Some(ActionKind::Recreate) && in_cooldown;
            if !recreate_cooling && (history.last_restart_failed || !in_cooldown) {
                return RemediationAction::recreate(unit_id, DecisionReason::RestartDidNotRecover);
            }
            return RemediationAction::none(unit_id, DecisionReason::CooldownActive);
        }

        if in_cooldown {
            return RemediationAction::none(unit_id, DecisionReason::CooldownActive);
        }
        RemediationAction::restart(unit_id, DecisionReason::UnhealthyStreak)
    }

    fn decide_scale(&self, input: &DecisionInput<'_>) -> Option<RemediationAction> {
        let service = input.unit.scale_target()?;
        if input.elevated_polls < self.config.load_sustain_polls {
            return None;
        }
        let history = input.scale_history.unwrap_or(input.history);
        if history.in_cooldown(&self.config, input.now) {
            return Some(RemediationAction::none(&input.unit.id, DecisionReason::CooldownActive));
        }
        let step = self.config.scale_step.min(self.config.max_scale_step);
        Some(RemediationAction::scale_by(
            service,
            i64::from(step),
            DecisionReason::SustainedLoad,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionOutcome, OutcomeError, FailureKind, RunState, UnitKind};

    fn policy() -> RemediationPolicy {
        RemediationPolicy::new(PolicyConfig::default())
    }

    fn unit() -> MonitoredUnit {
        MonitoredUnit::new("aaaaaaaaaaaa1111", "auth-service", "auth:1", UnitKind::Container)
    }

    fn snap(state: HealthState, streak: u32) -> HealthSnapshot {
        HealthSnapshot::new("aaaaaaaaaaaa1111", RunState::Running, state, streak, vec![])
    }

    fn decide_with(
        p: &RemediationPolicy,
        unit: &MonitoredUnit,
        current: &HealthSnapshot,
        history: &RemediationHistory,
        now: DateTime<Utc>,
    ) -> RemediationAction {
        p.decide(&DecisionInput {
            unit,
            current,
            prior: None,
            mode: None,
            history,
            scale_history: None,
            elevated_polls: 0,
            now,
        })
    }

    fn failed_restart(history: &mut RemediationHistory, at: DateTime<Utc>) {
        history.record_start(ActionKind::Restart, at);
        let action = RemediationAction::restart("aaaaaaaaaaaa1111", DecisionReason::UnhealthyStreak);
        history.record_outcome(&ActionOutcome::failed(
            &action,
            at,
            OutcomeError {
                kind: FailureKind::CommandFailed,
                message: "restart refused".to_string(),
                retryable: false,
            },
        ));
    }

    #[test]
    fn test_first_failure_restarts() {
        let action = decide_with(&policy(), &unit(), &snap(HealthState::Unhealthy, 1), &RemediationHistory::default(), Utc::now());
        assert_eq!(action.kind, ActionKind::Restart);
        assert_eq!(action.reason, DecisionReason::UnhealthyStreak);
    }

    #[test]
    fn test_never_recreate_without_prior_restart() {
        let p = policy();
        let history = RemediationHistory::default();
        for streak in 1..20 {
            let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, streak), &history, Utc::now());
            assert_ne!(action.kind, ActionKind::Recreate, "streak {streak}");
        }
    }

    #[test]
    fn test_zero_streak_unhealthy_is_ambiguous() {
        let action = decide_with(&policy(), &unit(), &snap(HealthState::Unhealthy, 0), &RemediationHistory::default(), Utc::now());
        assert!(action.is_none());
        assert_eq!(action.reason, DecisionReason::AmbiguousReading);
    }

    #[test]
    fn test_none_and_unknown_are_distinct() {
        let p = policy();
        let h = RemediationHistory::default();
        let none = decide_with(&p, &unit(), &snap(HealthState::None, 0), &h, Utc::now());
        assert_eq!(none.reason, DecisionReason::NoHealthCheck);

        let probe = HealthSnapshot::unknown("aaaaaaaaaaaa1111", "timeout");
        let unknown = decide_with(&p, &unit(), &probe, &h, Utc::now());
        assert_eq!(unknown.reason, DecisionReason::UnknownHealth);
    }

    #[test]
    fn test_restart_suppressed_in_cooldown() {
        let p = policy();
        let now = Utc::now();
        let mut h = RemediationHistory::default();
        h.record_start(ActionKind::Restart, now);

        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 2), &h, now + Duration::seconds(5));
        assert!(action.is_none());
        assert_eq!(action.reason, DecisionReason::CooldownActive);

        let later = now + h.cooldown(p.config()) + Duration::seconds(1);
        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 2), &h, later);
        assert_eq!(action.kind, ActionKind::Restart);
    }

    #[test]
    fn test_failed_restart_escalates_to_recreate() {
        let p = policy();
        let now = Utc::now();
        let mut h = RemediationHistory::default();
        failed_restart(&mut h, now);

        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 4), &h, now + Duration::seconds(5));
        assert_eq!(action.kind, ActionKind::Recreate);
        assert_eq!(action.reason, DecisionReason::RestartDidNotRecover);
    }

    #[test]
    fn test_successful_restart_waits_for_cooldown_before_recreate() {
        let p = policy();
        let now = Utc::now();
        let mut h = RemediationHistory::default();
        h.record_start(ActionKind::Restart, now);
        let action = RemediationAction::restart("aaaaaaaaaaaa1111", DecisionReason::UnhealthyStreak);
        h.record_outcome(&ActionOutcome::succeeded(&action, now));

        let early = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 3), &h, now + Duration::seconds(1));
        assert!(early.is_none());

        let late = now + h.cooldown(p.config());
        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 3), &h, late);
        assert_eq!(action.kind, ActionKind::Recreate);
    }

    #[test]
    fn test_recreate_not_repeated_within_cooldown() {
        let p = policy();
        let now = Utc::now();
        let mut h = RemediationHistory::default();
        failed_restart(&mut h, now);
        h.record_start(ActionKind::Recreate, now);

        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 5), &h, now + Duration::seconds(1));
        assert!(action.is_none());
        assert_eq!(action.reason, DecisionReason::CooldownActive);
    }

    #[test]
    fn test_below_threshold() {
        let p = RemediationPolicy::new(PolicyConfig {
            restart_threshold: 2,
            recreate_threshold: 4,
            ..PolicyConfig::default()
        });
        let action = decide_with(&p, &unit(), &snap(HealthState::Unhealthy, 1), &RemediationHistory::default(), Utc::now());
        assert_eq!(action.reason, DecisionReason::BelowRestartThreshold);
    }

    #[test]
    fn test_down_mode_forces_restart() {
        let p = policy();
        let healthy = snap(HealthState::Healthy, 0);
        let action = p.decide(&DecisionInput {
            unit: &unit(),
            current: &healthy,
            prior: None,
            mode: Some(FaultMode::Down),
            history: &RemediationHistory::default(),
            scale_history: None,
            elevated_polls: 0,
            now: Utc::now(),
        });
        assert_eq!(action.kind, ActionKind::Restart);
    }

    #[test]
    fn test_sustained_load_scales_service() {
        let p = policy();
        let worker = MonitoredUnit::new("bbbbbbbbbbbb2222", "payments-worker", "pay:1", UnitKind::Container)
            .with_service("payments");
        let healthy = snap(HealthState::Healthy, 0);
        let h = RemediationHistory::default();
        let input = |elevated_polls| DecisionInput {
            unit: &worker,
            current: &healthy,
            prior: None,
            mode: None,
            history: &h,
            scale_history: None,
            elevated_polls,
            now: Utc::now(),
        };

        assert!(p.decide(&input(p.config().load_sustain_polls - 1)).is_none());

        let action = p.decide(&input(p.config().load_sustain_polls));
        assert_eq!(action.kind, ActionKind::Scale);
        assert_eq!(action.target, "payments");
        assert_eq!(action.parameters.replica_delta, Some(1));
    }

    #[test]
    fn test_load_ignored_for_unscalable_unit() {
        let p = policy();
        let healthy = snap(HealthState::Healthy, 0);
        let action = p.decide(&DecisionInput {
            unit: &unit(),
            current: &healthy,
            prior: None,
            mode: None,
            history: &RemediationHistory::default(),
            scale_history: None,
            elevated_polls: 50,
            now: Utc::now(),
        });
        assert!(action.is_none());
        assert_eq!(action.reason, DecisionReason::Healthy);
    }

    #[test]
    fn test_service_cooldown_holds_every_replica() {
        let p = policy();
        let now = Utc::now();
        let replica = MonitoredUnit::new("cccccccccccc3333", "payments-worker-2", "pay:1", UnitKind::Container)
            .with_service("payments");
        let healthy = snap(HealthState::Healthy, 0);
        let own = RemediationHistory::default();
        let mut service = RemediationHistory::default();
        service.record_start(ActionKind::Scale, now);

        let action = p.decide(&DecisionInput {
            unit: &replica,
            current: &healthy,
            prior: None,
            mode: None,
            history: &own,
            scale_history: Some(&service),
            elevated_polls: p.config().load_sustain_polls,
            now: now + Duration::seconds(1),
        });
        assert!(action.is_none());
        assert_eq!(action.reason, DecisionReason::CooldownActive);
    }
}
