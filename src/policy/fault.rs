//! Operator fault overrides.
//!
//! A fault override replaces the runtime's health reading with a forced
//! classification until it expires, so the remediation path can be
//! exercised on a live system.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HealthSnapshot, HealthState};

/// Forced classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// Unhealthy, with the failing streak growing every poll
    Down,
    /// Still starting
    Slow,
    Healthy,
}

impl std::fmt::Display for FaultMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultMode::Down => write!(f, "down"),
            FaultMode::Slow => write!(f, "slow"),
            FaultMode::Healthy => write!(f, "healthy"),
        }
    }
}

/// An active fault override on one unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FaultOverride {
    pub mode: FaultMode,
    pub set_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FaultOverride {
    pub fn new(mode: FaultMode, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            mode,
            set_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Apply `mode` to a raw reading.
///
/// `prior` is the previous effective snapshot. Under `Down` the streak is
/// one more than the prior effective streak, and never below the live one.
pub fn apply_mode(
    raw: &HealthSnapshot,
    prior: Option<&HealthSnapshot>,
    mode: Option<FaultMode>,
) -> HealthSnapshot {
    let Some(mode) = mode else {
        return raw.clone();
    };

    let (state, streak) = match mode {
        FaultMode::Down => {
            let grown = prior
                .filter(|p| p.is_unhealthy())
                .map_or(1, |p| p.failing_streak.saturating_add(1));
            (HealthState::Unhealthy, grown.max(raw.failing_streak))
        }
        FaultMode::Slow => (HealthState::Starting, 0),
        FaultMode::Healthy => (HealthState::Healthy, 0),
    };

    HealthSnapshot::new(
        raw.unit_id.clone(),
        raw.run_state,
        state,
        streak,
        raw.recent_log.clone(),
    )
    .with_observed_at(raw.observed_at)
}
