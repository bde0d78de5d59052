//! Action Executor
//!
//! Carries out a decided [`RemediationAction`] against the runtime and
//! reports exactly one [`ActionOutcome`], which is also appended to the
//! activity log. Runtime errors never escape this module.
//!
//! Recreate is create-before-destroy:
//!
//! 1. inspect the old unit and capture its spec
//! 2. create `<name><suffix>` from that spec
//! 3. start it (a never-started replacement is removed again on failure)
//! 4. stop (if running) and remove the old unit
//! 5. rename the replacement to the original name
//!
//! A failure in steps 1-3 leaves the old unit untouched. A failure in 4-5
//! happens after the replacement is already serving and is reported as a
//! partial success that needs manual cleanup. Steps 1-3 and 4-5 each get
//! the action timeout; running out of it during 4-5 is partial as well.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::config::ExecutorConfig;
use crate::runtime::{RuntimeError, RuntimeGateway};
use crate::types::{
    ActionKind, ActionOutcome, EventDraft, FailureKind, MonitoredUnit, OutcomeError, RemediationAction,
    UnitDetail,
};

fn timed_out(action: &RemediationAction, started_at: DateTime<Utc>, timeout: std::time::Duration) -> ActionOutcome {
    ActionOutcome::failed(
        action,
        started_at,
        OutcomeError {
            kind: FailureKind::Timeout,
            message: format!("{} abandoned after {}ms", action.kind, timeout.as_millis()),
            retryable: true,
        },
    )
}

/// Runs remediation actions with a per-action time budget.
pub struct ActionExecutor {
    gateway: Arc<dyn RuntimeGateway>,
    activity: Arc<ActivityLog>,
    config: ExecutorConfig,
    grace_period_secs: u64,
}

impl ActionExecutor {
    pub fn new(
        gateway: Arc<dyn RuntimeGateway>,
        activity: Arc<ActivityLog>,
        config: ExecutorConfig,
        grace_period_secs: u64,
    ) -> Self {
        Self {
            gateway,
            activity,
            config,
            grace_period_secs,
        }
    }

    /// Execute `action` and publish its outcome.
    ///
    /// `subject` is the unit the action was decided for; operator scale
    /// commands have none. A `none` action is a no-op and is not recorded.
    pub async fn execute(&self, subject: Option<&MonitoredUnit>, action: &RemediationAction) -> ActionOutcome {
        let started_at = Utc::now();
        if action.is_none() {
            return ActionOutcome::succeeded(action, started_at);
        }

        let unit_name = subject.map(|u| u.name.as_str());
        info!(
            unit = unit_name.unwrap_or("-"),
            target = %action.target,
            action = %action.kind,
            reason = %action.reason,
            "Executing remediation"
        );

        let timeout = self.config.action_timeout();
        let outcome = match action.kind {
            // Budgets its two phases itself.
            ActionKind::Recreate => self.recreate(action, started_at).await,
            _ => match tokio::time::timeout(timeout, self.run(action, started_at)).await {
                Ok(outcome) => outcome,
                Err(_) => timed_out(action, started_at, timeout),
            },
        };

        self.activity.append(EventDraft::outcome(
            unit_name,
            subject.map(|u| u.id.as_str()),
            &outcome,
        ));
        outcome
    }

    async fn run(&self, action: &RemediationAction, started_at: DateTime<Utc>) -> ActionOutcome {
        match action.kind {
            ActionKind::None => ActionOutcome::succeeded(action, started_at),
            ActionKind::Restart => self.restart(action, started_at).await,
            ActionKind::Recreate => self.recreate(action, started_at).await,
            ActionKind::Scale => self.scale(action, started_at).await,
        }
    }

    async fn restart(&self, action: &RemediationAction, started_at: DateTime<Utc>) -> ActionOutcome {
        match self.gateway.restart(&action.target, self.grace_period_secs).await {
            Ok(()) => ActionOutcome::succeeded(action, started_at),
            Err(e) => ActionOutcome::failed(action, started_at, e.to_outcome_error()),
        }
    }

    async fn recreate(&self, action: &RemediationAction, started_at: DateTime<Utc>) -> ActionOutcome {
        let old_id = action.target.as_str();
        let budget = self.config.action_timeout();

        let (detail, new_id) = match tokio::time::timeout(budget, self.bring_up(old_id)).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => return ActionOutcome::failed(action, started_at, e.to_outcome_error()),
            Err(_) => return timed_out(action, started_at, budget),
        };

        // The replacement is running; from here on the outcome is a success.
        match tokio::time::timeout(budget, self.retire(old_id, &detail, &new_id)).await {
            Ok(Ok(())) => ActionOutcome::succeeded(action, started_at).with_new_unit(new_id),
            Ok(Err(cleanup)) => ActionOutcome::partial(action, started_at, new_id, cleanup),
            Err(_) => {
                warn!(unit = %detail.unit.name, new_id = %new_id, "Recreate cleanup timed out");
                ActionOutcome::partial(
                    action,
                    started_at,
                    new_id,
                    format!("cleanup abandoned after {}ms", budget.as_millis()),
                )
            }
        }
    }

    /// Steps 1-3: a started replacement under the temporary name.
    async fn bring_up(&self, old_id: &str) -> Result<(UnitDetail, String), RuntimeError> {
        let detail = self.gateway.inspect_unit(old_id).await?;
        let name = detail.unit.name.clone();
        let temp_name = format!("{}{}", name, self.config.recreate_suffix);

        let new_id = self.gateway.create(&temp_name, &detail.spec).await?;
        if let Err(e) = self.gateway.start(&new_id).await {
            if let Err(cleanup) = self.gateway.remove(&new_id).await {
                warn!(unit = %name, new_id = %new_id, error = %cleanup, "Failed to remove unstarted replacement");
            }
            return Err(e);
        }
        Ok((detail, new_id))
    }

    /// Steps 4-5. The error is the cleanup that was left undone.
    async fn retire(&self, old_id: &str, detail: &UnitDetail, new_id: &str) -> Result<(), String> {
        if detail.running {
            if let Err(e) = self.gateway.stop(old_id, self.grace_period_secs).await {
                if !e.is_not_found() {
                    return Err(format!("stop old unit: {e}"));
                }
            }
        }
        if let Err(e) = self.gateway.remove(old_id).await {
            if !e.is_not_found() {
                return Err(format!("remove old unit: {e}"));
            }
        }
        self.gateway
            .rename(new_id, &detail.unit.name)
            .await
            .map_err(|e| format!("rename replacement: {e}"))
    }

    async fn scale(&self, action: &RemediationAction, started_at: DateTime<Utc>) -> ActionOutcome {
        let service = action.target.as_str();
        let current = match self.gateway.inspect_service(service).await {
            Ok(state) => state,
            Err(e) => return ActionOutcome::failed(action, started_at, e.to_outcome_error()),
        };

        let wanted = match (action.parameters.replicas, action.parameters.replica_delta) {
            (Some(replicas), _) => replicas,
            (None, Some(delta)) => current.replicas.saturating_add_signed(delta),
            (None, None) => current.replicas,
        };
        let target = wanted.clamp(self.config.min_replicas, self.config.max_replicas);
        if target != wanted {
            warn!(service, wanted, applied = target, "Replica count clamped");
        }
        if target == current.replicas {
            return ActionOutcome::succeeded(action, started_at).with_replicas(target);
        }

        match self
            .gateway
            .update_service_replicas(service, current.version, target)
            .await
        {
            Ok(()) => ActionOutcome::succeeded(action, started_at).with_replicas(target),
            Err(e) => ActionOutcome::failed(action, started_at, e.to_outcome_error()),
        }
    }
}
