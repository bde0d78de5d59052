//! Per-unit remediation history and cooldown windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::types::{ActionKind, ActionOutcome};

/// Longest doubling applied to the base cooldown.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// What has been tried on a unit since it last recovered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationHistory {
    /// When the most recent action started (set before it runs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionKind>,
    pub restarts_attempted: u32,
    pub last_restart_failed: bool,
    /// Actions since the last recovery; drives cooldown doubling
    pub consecutive_attempts: u32,
}

impl RemediationHistory {
    /// Record that an action is starting. An abandoned action still counts.
    pub fn record_start(&mut self, kind: ActionKind, at: DateTime<Utc>) {
        self.last_action_at = Some(at);
        self.last_action = Some(kind);
        self.consecutive_attempts = self.consecutive_attempts.saturating_add(1);
        if kind == ActionKind::Restart {
            self.restarts_attempted = self.restarts_attempted.saturating_add(1);
            self.last_restart_failed = false;
        }
    }

    pub fn record_outcome(&mut self, outcome: &ActionOutcome) {
        match outcome.action {
            ActionKind::Restart => self.last_restart_failed = !outcome.success,
            // A fresh instance has to earn its own restart before another recreate.
            ActionKind::Recreate if outcome.success => {
                self.restarts_attempted = 0;
                self.last_restart_failed = false;
            }
            _ => {}
        }
    }

    /// The unit came back healthy.
    pub fn reset(&mut self) {
        self.restarts_attempted = 0;
        self.last_restart_failed = false;
        self.consecutive_attempts = 0;
    }

    /// Cooldown that follows the most recent action.
    pub fn cooldown(&self, config: &PolicyConfig) -> Duration {
        let base = config
            .grace_period_secs
            .saturating_mul(u64::from(config.cooldown_multiplier));
        let exponent = self
            .consecutive_attempts
            .saturating_sub(1)
            .min(MAX_BACKOFF_EXPONENT);
        let secs = base
            .saturating_mul(1u64 << exponent)
            .min(config.max_cooldown_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// When the current cooldown window closes, if one is open.
    pub fn cooldown_until(&self, config: &PolicyConfig) -> Option<DateTime<Utc>> {
        self.last_action_at.map(|at| at + self.cooldown(config))
    }

    pub fn in_cooldown(&self, config: &PolicyConfig, now: DateTime<Utc>) -> bool {
        self.cooldown_until(config).is_some_and(|until| now < until)
    }
}
