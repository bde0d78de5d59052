//! Remediation decisions and their execution outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Corrective operation chosen by the policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    None,
    Restart,
    Recreate,
    Scale,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::None => write!(f, "none"),
            ActionKind::Restart => write!(f, "restart"),
            ActionKind::Recreate => write!(f, "recreate"),
            ActionKind::Scale => write!(f, "scale"),
        }
    }
}

/// Which policy rule (or operator command) produced an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Healthy,
    Starting,
    NoHealthCheck,
    UnknownHealth,
    AmbiguousReading,
    BelowRestartThreshold,
    CooldownActive,
    UnhealthyStreak,
    RestartDidNotRecover,
    SustainedLoad,
    OperatorHeal,
    OperatorEscalation,
    OperatorScale,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DecisionReason::Healthy => "unit is healthy",
            DecisionReason::Starting => "unit is still starting",
            DecisionReason::NoHealthCheck => "unit has no health check",
            DecisionReason::UnknownHealth => "health could not be determined",
            DecisionReason::AmbiguousReading => "unhealthy reading with zero failing streak",
            DecisionReason::BelowRestartThreshold => "failing streak below restart threshold",
            DecisionReason::CooldownActive => "cooldown window still active",
            DecisionReason::UnhealthyStreak => "failing streak reached restart threshold",
            DecisionReason::RestartDidNotRecover => "restart did not recover the unit",
            DecisionReason::SustainedLoad => "load stayed above the high watermark",
            DecisionReason::OperatorHeal => "operator requested heal",
            DecisionReason::OperatorEscalation => "operator requested recreate",
            DecisionReason::OperatorScale => "operator requested scale",
        };
        write!(f, "{text}")
    }
}

/// Action parameters (only scale carries any today)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionParameters {
    /// Absolute target replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u64>,
    /// Replica change relative to the current count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_delta: Option<i64>,
}

/// A decided corrective operation.
///
/// `target` is a unit id for restart/recreate and a service name for scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    pub kind: ActionKind,
    pub target: String,
    #[serde(default)]
    pub parameters: ActionParameters,
    pub reason: DecisionReason,
}

impl RemediationAction {
    pub fn none(unit_id: impl Into<String>, reason: DecisionReason) -> Self {
        Self {
            kind: ActionKind::None,
            target: unit_id.into(),
            parameters: ActionParameters::default(),
            reason,
        }
    }

    pub fn restart(unit_id: impl Into<String>, reason: DecisionReason) -> Self {
        Self {
            kind: ActionKind::Restart,
            target: unit_id.into(),
            parameters: ActionParameters::default(),
            reason,
        }
    }

    pub fn recreate(unit_id: impl Into<String>, reason: DecisionReason) -> Self {
        Self {
            kind: ActionKind::Recreate,
            target: unit_id.into(),
            parameters: ActionParameters::default(),
            reason,
        }
    }

    pub fn scale_to(service: impl Into<String>, replicas: u64, reason: DecisionReason) -> Self {
        Self {
            kind: ActionKind::Scale,
            target: service.into(),
            parameters: ActionParameters {
                replicas: Some(replicas),
                replica_delta: None,
            },
            reason,
        }
    }

    pub fn scale_by(service: impl Into<String>, delta: i64, reason: DecisionReason) -> Self {
        Self {
            kind: ActionKind::Scale,
            target: service.into(),
            parameters: ActionParameters {
                replicas: None,
                replica_delta: Some(delta),
            },
            reason,
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == ActionKind::None
    }
}

/// How an executed action ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    /// Functional goal reached, cleanup or rename left inconsistent
    Partial,
    Failed,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Succeeded => write!(f, "succeeded"),
            OutcomeStatus::Partial => write!(f, "partial"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error category carried by a failed outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RuntimeUnavailable,
    UnitNotFound,
    CommandFailed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeError {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

/// Result of executing a [`RemediationAction`].
///
/// `error` is present iff `success` is false. A partial recreate reports
/// `success = true` with `status = Partial` and a `cleanup_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: ActionKind,
    pub target: String,
    pub success: bool,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
    /// Identity of the replacement after recreate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_unit_id: Option<String>,
    /// Replica count applied by scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u64>,
    pub reason: DecisionReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn succeeded(action: &RemediationAction, started_at: DateTime<Utc>) -> Self {
        Self {
            action: action.kind,
            target: action.target.clone(),
            success: true,
            status: OutcomeStatus::Succeeded,
            error: None,
            cleanup_error: None,
            new_unit_id: None,
            replicas: None,
            reason: action.reason,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(action: &RemediationAction, started_at: DateTime<Utc>, error: OutcomeError) -> Self {
        Self {
            success: false,
            status: OutcomeStatus::Failed,
            error: Some(error),
            ..Self::succeeded(action, started_at)
        }
    }

    pub fn partial(
        action: &RemediationAction,
        started_at: DateTime<Utc>,
        new_unit_id: impl Into<String>,
        cleanup_error: impl Into<String>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Partial,
            cleanup_error: Some(cleanup_error.into()),
            new_unit_id: Some(new_unit_id.into()),
            ..Self::succeeded(action, started_at)
        }
    }

    pub fn with_new_unit(mut self, id: impl Into<String>) -> Self {
        self.new_unit_id = Some(id.into());
        self
    }

    pub fn with_replicas(mut self, replicas: u64) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn is_partial(&self) -> bool {
        self.status == OutcomeStatus::Partial
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }
}
