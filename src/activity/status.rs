//! Published aggregate status.
//!
//! The engine rebuilds a [`StatusSnapshot`] after every state change and
//! swaps it in whole; readers load an `Arc` and never see a half-applied
//! update.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::policy::{FaultOverride, RemediationHistory};
use crate::types::{ActionOutcome, HealthSnapshot, HealthState, MonitoredUnit};

/// Status of one monitored unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    pub unit: MonitoredUnit,
    /// Latest effective snapshot
    pub snapshot: Option<HealthSnapshot>,
    pub last_outcome: Option<ActionOutcome>,
    pub fault_override: Option<FaultOverride>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub history: RemediationHistory,
    pub load: Option<f64>,
    pub elevated_polls: u32,
}

impl UnitStatus {
    pub fn health_state(&self) -> HealthState {
        self.snapshot.as_ref().map_or(HealthState::Unknown, |s| s.health_state)
    }
}

/// Units per health state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounts {
    pub healthy: usize,
    pub unhealthy: usize,
    pub starting: usize,
    pub none: usize,
    pub unknown: usize,
}

impl HealthCounts {
    fn tally<'a>(units: impl IntoIterator<Item = &'a UnitStatus>) -> Self {
        let mut counts = Self::default();
        for unit in units {
            match unit.health_state() {
                HealthState::Healthy => counts.healthy += 1,
                HealthState::Unhealthy => counts.unhealthy += 1,
                HealthState::Starting => counts.starting += 1,
                HealthState::None => counts.none += 1,
                HealthState::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

/// Consistent, immutable view of the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub backend: String,
    pub runtime_reachable: bool,
    pub cycle_count: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    pub counts: HealthCounts,
    /// Sorted by unit name
    pub units: Vec<UnitStatus>,
    pub published_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn empty(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            runtime_reachable: true,
            cycle_count: 0,
            last_cycle_at: None,
            last_cycle_duration_ms: None,
            counts: HealthCounts::default(),
            units: Vec::new(),
            published_at: Utc::now(),
        }
    }

    /// Build a snapshot; units are sorted by name and counted.
    pub fn new(
        backend: impl Into<String>,
        runtime_reachable: bool,
        cycle_count: u64,
        last_cycle_at: Option<DateTime<Utc>>,
        last_cycle_duration_ms: Option<u64>,
        mut units: Vec<UnitStatus>,
    ) -> Self {
        units.sort_by(|a, b| a.unit.name.cmp(&b.unit.name));
        Self {
            backend: backend.into(),
            runtime_reachable,
            cycle_count,
            last_cycle_at,
            last_cycle_duration_ms,
            counts: HealthCounts::tally(&units),
            units,
            published_at: Utc::now(),
        }
    }

    /// Look a unit up by name, full id or display id.
    pub fn unit(&self, key: &str) -> Option<&UnitStatus> {
        self.units
            .iter()
            .find(|u| u.unit.name == key)
            .or_else(|| self.units.iter().find(|u| u.unit.id == key || u.unit.display_id == key))
    }
}

/// Single-writer, many-reader holder of the latest [`StatusSnapshot`].
pub struct StatusBoard {
    current: ArcSwap<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new(initial: StatusSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Arc<StatusSnapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}
