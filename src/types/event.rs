//! Activity stream entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionOutcome, HealthSnapshot, HealthState, MonitoredUnit, OutcomeStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Operational notices that are neither transitions nor outcomes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RuntimeUnavailable,
    CycleAbandoned,
    UnitRemoved,
    FaultInjected,
    FaultCleared,
}

/// What an activity event records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Transition {
        from: HealthState,
        to: HealthState,
        snapshot: HealthSnapshot,
    },
    Outcome {
        outcome: ActionOutcome,
    },
    Notice {
        notice: NoticeKind,
    },
}

/// An event before the publisher stamps it with a sequence number and time.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub severity: Severity,
    pub unit_name: Option<String>,
    pub unit_id: Option<String>,
    pub message: String,
    pub payload: EventPayload,
}

impl EventDraft {
    /// Health transition. Unhealthy is critical, a failed probe is a
    /// warning, everything else is informational.
    pub fn transition(unit: &MonitoredUnit, from: HealthState, snapshot: &HealthSnapshot) -> Self {
        let to = snapshot.health_state;
        let severity = match to {
            HealthState::Unhealthy => Severity::Critical,
            HealthState::Unknown if snapshot.probe_failed() => Severity::Warning,
            _ => Severity::Info,
        };
        let message = match (&snapshot.probe_error, to) {
            (Some(err), _) => format!("{} health unknown: {}", unit.name, err),
            (None, HealthState::Unhealthy) => format!(
                "{} is unhealthy (failing streak {})",
                unit.name, snapshot.failing_streak
            ),
            (None, HealthState::Healthy) if from != HealthState::Unknown => {
                format!("{} recovered ({} -> healthy)", unit.name, from)
            }
            (None, _) if snapshot.ambiguous => {
                format!("{} reported unhealthy with zero failing streak", unit.name)
            }
            (None, _) => format!("{} is {}", unit.name, to),
        };
        Self {
            severity,
            unit_name: Some(unit.name.clone()),
            unit_id: Some(unit.id.clone()),
            message,
            payload: EventPayload::Transition {
                from,
                to,
                snapshot: snapshot.clone(),
            },
        }
    }

    /// Executor result. Failures are critical, partial remediation a warning.
    pub fn outcome(unit_name: Option<&str>, unit_id: Option<&str>, outcome: &ActionOutcome) -> Self {
        let subject = unit_name.unwrap_or(&outcome.target);
        let (severity, message) = match outcome.status {
            OutcomeStatus::Succeeded => (
                Severity::Info,
                match (&outcome.new_unit_id, outcome.replicas) {
                    (Some(new_id), _) => format!(
                        "{} {} succeeded (new id {})",
                        outcome.action,
                        subject,
                        super::short_id(new_id)
                    ),
                    (None, Some(replicas)) => {
                        format!("{} {} succeeded ({} replicas)", outcome.action, subject, replicas)
                    }
                    (None, None) => format!("{} {} succeeded", outcome.action, subject),
                },
            ),
            OutcomeStatus::Partial => (
                Severity::Warning,
                format!(
                    "{} {} partially succeeded, manual cleanup needed: {}",
                    outcome.action,
                    subject,
                    outcome.cleanup_error.as_deref().unwrap_or("unknown")
                ),
            ),
            OutcomeStatus::Failed => (
                Severity::Critical,
                format!(
                    "{} {} failed: {}",
                    outcome.action,
                    subject,
                    outcome.error.as_ref().map_or("unknown", |e| e.message.as_str())
                ),
            ),
        };
        Self {
            severity,
            unit_name: unit_name.map(str::to_string),
            unit_id: unit_id.map(str::to_string),
            message,
            payload: EventPayload::Outcome {
                outcome: outcome.clone(),
            },
        }
    }

    pub fn notice(severity: Severity, notice: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            unit_name: None,
            unit_id: None,
            message: message.into(),
            payload: EventPayload::Notice { notice },
        }
    }

    pub fn for_unit(mut self, unit: &MonitoredUnit) -> Self {
        self.unit_name = Some(unit.name.clone());
        self.unit_id = Some(unit.id.clone());
        self
    }
}

/// Append-only activity stream entry, stamped by the publisher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    pub message: String,
    pub payload: EventPayload,
}

impl ActivityEvent {
    pub fn stamp(draft: EventDraft, seq: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            seq,
            timestamp,
            severity: draft.severity,
            unit_name: draft.unit_name,
            unit_id: draft.unit_id,
            message: draft.message,
            payload: draft.payload,
        }
    }
}
