//! Health snapshots and their canonical classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most recent health-check results kept per snapshot (newest last).
pub const MAX_RECENT_LOG: usize = 5;

/// Process state reported by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Exited,
    #[default]
    Other,
}

impl RunState {
    /// Map a runtime state string ("running", "exited", ...) onto the canonical set.
    pub fn from_runtime(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" => RunState::Running,
            "exited" | "dead" => RunState::Exited,
            _ => RunState::Other,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Exited => write!(f, "exited"),
            RunState::Other => write!(f, "other"),
        }
    }
}

/// Canonical health classification.
///
/// `None` means the unit has no health check configured. `Unknown` means
/// the health query itself failed or the reading was ambiguous; the
/// policy never acts on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    None,
    #[default]
    Unknown,
}

impl HealthState {
    /// Map a runtime health string onto the canonical set.
    pub fn from_runtime(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "healthy" => HealthState::Healthy,
            "unhealthy" => HealthState::Unhealthy,
            "starting" => HealthState::Starting,
            "none" | "" => HealthState::None,
            _ => HealthState::Unknown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Starting => write!(f, "starting"),
            HealthState::None => write!(f, "none"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// One health-check execution as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckEntry {
    pub exit_code: i64,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

/// A point-in-time read of one unit's health.
///
/// Constructed through [`HealthSnapshot::new`], which enforces that an
/// `Unhealthy` snapshot always carries `failing_streak >= 1` and that the
/// recent log holds at most [`MAX_RECENT_LOG`] entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub unit_id: String,
    pub run_state: RunState,
    pub health_state: HealthState,
    pub failing_streak: u32,
    pub recent_log: Vec<HealthCheckEntry>,
    pub observed_at: DateTime<Utc>,
    /// Why the reading is `Unknown`, when the query failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
    /// Runtime reported unhealthy with a zero failing streak
    #[serde(default)]
    pub ambiguous: bool,
}

impl HealthSnapshot {
    pub fn new(
        unit_id: impl Into<String>,
        run_state: RunState,
        health_state: HealthState,
        failing_streak: u32,
        mut recent_log: Vec<HealthCheckEntry>,
    ) -> Self {
        if recent_log.len() > MAX_RECENT_LOG {
            recent_log.drain(..recent_log.len() - MAX_RECENT_LOG);
        }

        // Unhealthy with no failures on record contradicts itself; keep it
        // out of the remediation path.
        let ambiguous = health_state == HealthState::Unhealthy && failing_streak == 0;
        let health_state = if ambiguous { HealthState::Unknown } else { health_state };

        Self {
            unit_id: unit_id.into(),
            run_state,
            health_state,
            failing_streak,
            recent_log,
            observed_at: Utc::now(),
            probe_error: None,
            ambiguous,
        }
    }

    /// Snapshot for a unit whose health could not be queried.
    pub fn unknown(unit_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut snapshot = Self::new(unit_id, RunState::Other, HealthState::Unknown, 0, Vec::new());
        snapshot.probe_error = Some(error.into());
        snapshot
    }

    pub fn with_observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health_state == HealthState::Unhealthy
    }

    pub fn probe_failed(&self) -> bool {
        self.probe_error.is_some()
    }
}
