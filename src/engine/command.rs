//! Operator command types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{FaultMode, FaultOverride};
use crate::types::{ActionOutcome, MonitoredUnit};

/// What an operator asks of a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Down,
    Slow,
    Healthy,
    /// Remediate now, bypassing the policy
    Heal,
}

impl TriggerMode {
    /// The fault override this mode installs, if it is one.
    pub fn fault_mode(self) -> Option<FaultMode> {
        match self {
            TriggerMode::Down => Some(FaultMode::Down),
            TriggerMode::Slow => Some(FaultMode::Slow),
            TriggerMode::Healthy => Some(FaultMode::Healthy),
            TriggerMode::Heal => None,
        }
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Down => write!(f, "down"),
            TriggerMode::Slow => write!(f, "slow"),
            TriggerMode::Healthy => write!(f, "healthy"),
            TriggerMode::Heal => write!(f, "heal"),
        }
    }
}

/// Result of an operator command on a unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub unit: MonitoredUnit,
    pub mode: TriggerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_override: Option<FaultOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
}

/// Why a command was refused before reaching the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("unit {0} is busy with another action")]
    Busy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
