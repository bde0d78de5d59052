//! Error types for runtime gateway operations.

use thiserror::Error;

use crate::types::{FailureKind, OutcomeError};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Lifecycle command issued against the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOperation {
    List,
    Inspect,
    Health,
    Restart,
    Stop,
    Remove,
    Create,
    Start,
    Rename,
    InspectService,
    UpdateService,
}

impl std::fmt::Display for RuntimeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuntimeOperation::List => "list",
            RuntimeOperation::Inspect => "inspect",
            RuntimeOperation::Health => "health",
            RuntimeOperation::Restart => "restart",
            RuntimeOperation::Stop => "stop",
            RuntimeOperation::Remove => "remove",
            RuntimeOperation::Create => "create",
            RuntimeOperation::Start => "start",
            RuntimeOperation::Rename => "rename",
            RuntimeOperation::InspectService => "inspect_service",
            RuntimeOperation::UpdateService => "update_service",
        };
        write!(f, "{name}")
    }
}

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Transport or connectivity failure.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// Target vanished between observation and action.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// A specific lifecycle command was rejected.
    #[error("{operation} failed: {cause}")]
    CommandFailed {
        operation: RuntimeOperation,
        cause: String,
        /// Stale-version conflicts and similar races succeed on a fresh attempt
        retryable: bool,
    },

    /// The runtime did not answer within the allotted time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: RuntimeOperation,
        timeout_ms: u64,
    },
}

impl RuntimeError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::UnitNotFound(id.into())
    }

    pub fn command_failed(operation: RuntimeOperation, cause: impl Into<String>) -> Self {
        Self::CommandFailed {
            operation,
            cause: cause.into(),
            retryable: false,
        }
    }

    /// Optimistic-concurrency conflict (stale version on write).
    pub fn conflict(operation: RuntimeOperation, cause: impl Into<String>) -> Self {
        Self::CommandFailed {
            operation,
            cause: cause.into(),
            retryable: true,
        }
    }

    pub fn timeout(operation: RuntimeOperation, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => true,
            Self::CommandFailed { retryable, .. } => *retryable,
            Self::UnitNotFound(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnitNotFound(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable(_) => FailureKind::RuntimeUnavailable,
            Self::UnitNotFound(_) => FailureKind::UnitNotFound,
            Self::CommandFailed { .. } => FailureKind::CommandFailed,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// Convert into the error carried by an [`crate::types::ActionOutcome`].
    pub fn to_outcome_error(&self) -> OutcomeError {
        OutcomeError {
            kind: self.failure_kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}
