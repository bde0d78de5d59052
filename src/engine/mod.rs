//! Remediation Engine
//!
//! Drives the observe → decide → act loop:
//!
//! 1. list the labeled units and reconcile the unit table
//! 2. sample every unit's health concurrently (bounded)
//! 3. apply fault overrides, emit transition events
//! 4. ask the policy for an action and hand it to the executor
//!
//! Work on one unit is serialized by a per-name async mutex; a unit that is
//! busy is skipped for the cycle. Scaling is tracked per service: replicas
//! share one load counter and one cooldown, and a scale holds the service's
//! lock. A recreate also holds the replacement's name so the poll leaves the
//! half-built unit alone. The status board is republished after every table
//! change.

mod command;
mod locks;

pub use command::{CommandError, TriggerMode, TriggerResult};
pub use locks::{UnitGuard, UnitLocks};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, FeedQuery, StatusBoard, StatusSnapshot, UnitStatus};
use crate::config::{ObserverConfig, SentinelConfig};
use crate::executor::ActionExecutor;
use crate::observer::{detect_transition, HealthObserver, Reconciled, UnitTable};
use crate::policy::{
    DecisionInput, FaultMode, FaultOverride, LoadSignal, NoLoadSignal, RemediationPolicy, ReportedLoad,
};
use crate::runtime::RuntimeGateway;
use crate::types::{
    ActionKind, ActionOutcome, ActivityEvent, DecisionReason, EventDraft, FailureKind, HealthState,
    MonitoredUnit, NoticeKind, RemediationAction, Severity,
};

/// Prefix for lock keys of scale actions.
const SERVICE_LOCK_PREFIX: &str = "service:";

fn service_lock_key(service: &str) -> String {
    format!("{SERVICE_LOCK_PREFIX}{service}")
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub units: usize,
    pub observed: usize,
    pub actions: usize,
    pub failed_actions: usize,
    pub skipped_busy: usize,
    pub removed: usize,
    pub runtime_unavailable: bool,
    pub abandoned: bool,
    pub duration_ms: u64,
}

/// What the decide step of `process_unit` settled on.
enum Step {
    Idle,
    /// An action was wanted but its lock is held elsewhere
    Deferred,
    Act(RemediationAction, MonitoredUnit, Option<UnitGuard>),
}

enum UnitResult {
    Busy,
    Gone,
    Observed,
    Acted { success: bool },
}

impl CycleReport {
    fn record(&mut self, result: UnitResult) {
        match result {
            UnitResult::Busy => self.skipped_busy += 1,
            UnitResult::Gone => {}
            UnitResult::Observed => self.observed += 1,
            UnitResult::Acted { success } => {
                self.observed += 1;
                self.actions += 1;
                if !success {
                    self.failed_actions += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CycleStats {
    count: u64,
    last_at: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
    runtime_reachable: bool,
}

/// The self-healing engine. Shared behind an `Arc` by the poll loop and
/// the HTTP API.
pub struct Engine {
    gateway: Arc<dyn RuntimeGateway>,
    observer: HealthObserver,
    policy: RemediationPolicy,
    executor: ActionExecutor,
    activity: Arc<ActivityLog>,
    status: StatusBoard,
    table: Mutex<UnitTable>,
    locks: UnitLocks,
    load_signal: Arc<dyn LoadSignal>,
    reported_load: ReportedLoad,
    observer_config: ObserverConfig,
    action_timeout: Duration,
    recreate_suffix: String,
    stats: Mutex<CycleStats>,
}

/// Every replica of `service` reports the outcome of its scale.
fn record_scale_outcome(table: &mut UnitTable, service: &str, outcome: &ActionOutcome) {
    table.service_mut(service).history.record_outcome(outcome);
    let members: Vec<String> = table
        .records()
        .filter(|r| r.unit.scale_target() == Some(service))
        .map(|r| r.unit.id.clone())
        .collect();
    for id in members {
        if let Some(record) = table.get_mut(&id) {
            record.last_outcome = Some(outcome.clone());
        }
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Engine {
    pub fn new(config: &SentinelConfig, gateway: Arc<dyn RuntimeGateway>, activity: Arc<ActivityLog>) -> Self {
        let observer = HealthObserver::new(
            gateway.clone(),
            config.runtime.unit_filter(),
            config.runtime.request_timeout(),
            config.observer.health_timeout(),
        );
        let executor = ActionExecutor::new(
            gateway.clone(),
            activity.clone(),
            config.executor.clone(),
            config.policy.grace_period_secs,
        );
        let status = StatusBoard::new(StatusSnapshot::empty(gateway.backend_name()));

        Self {
            observer,
            policy: RemediationPolicy::new(config.policy.clone()),
            executor,
            activity,
            status,
            table: Mutex::new(UnitTable::new()),
            locks: UnitLocks::new(),
            load_signal: Arc::new(NoLoadSignal),
            reported_load: ReportedLoad::new(),
            observer_config: config.observer.clone(),
            action_timeout: config.executor.action_timeout(),
            recreate_suffix: config.executor.recreate_suffix.clone(),
            stats: Mutex::new(CycleStats {
                count: 0,
                last_at: None,
                last_duration_ms: None,
                runtime_reachable: true,
            }),
            gateway,
        }
    }

    /// Use an external load source. Values sent through
    /// [`Engine::report_load`] still apply where it has none.
    pub fn with_load_signal(mut self, signal: Arc<dyn LoadSignal>) -> Self {
        self.load_signal = signal;
        self
    }

    fn table(&self) -> MutexGuard<'_, UnitTable> {
        relock(&self.table)
    }

    pub fn backend_name(&self) -> &str {
        self.gateway.backend_name()
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Latest published status.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.status.load()
    }

    pub fn unit_status(&self, key: &str) -> Option<UnitStatus> {
        self.status.load().unit(key).cloned()
    }

    pub fn feed(&self, query: &FeedQuery) -> Vec<ActivityEvent> {
        self.activity.query(query)
    }

    fn publish_status(&self) {
        let units = self.table().statuses(self.policy.config());
        let stats = relock(&self.stats).clone();
        self.status.publish(StatusSnapshot::new(
            self.gateway.backend_name(),
            stats.runtime_reachable,
            stats.count,
            stats.last_at,
            stats.last_duration_ms,
            units,
        ));
    }

    // ========================================================================
    // Poll Loop
    // ========================================================================

    /// Poll until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.observer_config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            backend = self.backend_name(),
            poll_interval_ms = self.observer_config.poll_interval_ms,
            label = %self.observer.filter().label,
            "Remediation engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Remediation engine stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    debug!(
                        cycle = report.cycle,
                        units = report.units,
                        actions = report.actions,
                        duration_ms = report.duration_ms,
                        "Cycle complete"
                    );
                }
            }
        }
    }

    /// One observe → decide → act pass over every monitored unit.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let units = match self.observer.discover().await {
            Ok(units) => units,
            Err(e) => {
                let was_reachable = std::mem::replace(&mut relock(&self.stats).runtime_reachable, false);
                warn!(error = %e, "Runtime unavailable, skipping cycle");
                if was_reachable {
                    self.activity.append(EventDraft::notice(
                        Severity::Warning,
                        NoticeKind::RuntimeUnavailable,
                        format!("container runtime unavailable: {e}"),
                    ));
                }
                report.runtime_unavailable = true;
                self.finish_cycle(started, &mut report);
                return report;
            }
        };

        if !std::mem::replace(&mut relock(&self.stats).runtime_reachable, true) {
            info!("Runtime reachable again");
        }

        let reconciled = self.reconcile(&units);
        for unit in &reconciled.added {
            info!(unit = %unit.name, id = %unit.display_id, kind = %unit.kind, "Now monitoring");
        }
        for unit in &reconciled.removed {
            self.reported_load.clear(&unit.name);
            self.activity.append(
                EventDraft::notice(
                    Severity::Info,
                    NoticeKind::UnitRemoved,
                    format!("{} is no longer monitored", unit.name),
                )
                .for_unit(unit),
            );
        }
        let live: HashSet<String> = units.iter().map(|u| u.name.clone()).collect();
        self.locks.retain(&live);
        report.removed = reconciled.removed.len();
        report.units = units.len();
        self.track_service_load(&units);
        self.publish_status();

        let tally = Mutex::new(CycleReport::default());
        let work = stream::iter(units).for_each_concurrent(self.observer_config.max_concurrency, |unit| {
            let tally = &tally;
            async move {
                let result = self.process_unit(unit).await;
                relock(tally).record(result);
            }
        });

        if tokio::time::timeout(self.observer_config.cycle_timeout(), work).await.is_err() {
            report.abandoned = true;
            warn!(timeout_ms = self.observer_config.cycle_timeout_ms, "Cycle timed out, remaining work abandoned");
            self.activity.append(EventDraft::notice(
                Severity::Warning,
                NoticeKind::CycleAbandoned,
                format!(
                    "poll cycle exceeded {}ms, remaining units abandoned",
                    self.observer_config.cycle_timeout_ms
                ),
            ));
        }

        let tally = relock(&tally).clone();
        report.observed = tally.observed;
        report.actions = tally.actions;
        report.failed_actions = tally.failed_actions;
        report.skipped_busy = tally.skipped_busy;
        self.finish_cycle(started, &mut report);
        report
    }

    fn finish_cycle(&self, started: Instant, report: &mut CycleReport) {
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.cycle = {
            let mut stats = relock(&self.stats);
            stats.count += 1;
            stats.last_at = Some(Utc::now());
            stats.last_duration_ms = Some(report.duration_ms);
            stats.count
        };
        self.publish_status();
    }

    /// Merge a listing into the table. Units whose lock is held keep their
    /// record even when unlisted: a recreate removes the old container
    /// before the replacement takes its name.
    fn reconcile(&self, units: &[MonitoredUnit]) -> Reconciled {
        self.table()
            .reconcile_with(units, |record| self.locks.is_held(&record.unit.name))
    }

    fn sample_load(&self, unit: &MonitoredUnit) -> Option<f64> {
        if !unit.is_scalable() {
            return None;
        }
        self.load_signal
            .load(unit)
            .or_else(|| self.reported_load.load(unit))
    }

    /// Sample load for every scalable unit and advance each service's
    /// counter once, on the mean of the members that reported a value.
    fn track_service_load(&self, units: &[MonitoredUnit]) {
        let mut samples: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut loads = Vec::new();
        for unit in units {
            let Some(service) = unit.scale_target() else {
                continue;
            };
            let load = self.sample_load(unit);
            samples.entry(service).or_default().extend(load);
            loads.push((unit.id.as_str(), load));
        }

        let mut table = self.table();
        for (id, load) in loads {
            if let Some(record) = table.get_mut(id) {
                record.load = load;
            }
        }
        for (service, values) in samples {
            let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
            let record = table.service_mut(service);
            let was_elevated = record.elevated_polls > 0;
            record.load = mean;
            record.elevated_polls = self.policy.track_load(record.elevated_polls, mean);
            if was_elevated && record.elevated_polls == 0 {
                record.history.reset();
            }
        }
    }

    /// Lock an action needs besides its unit's own: the service for a
    /// scale, the replacement's name for a recreate.
    fn action_lock_key(&self, subject: &MonitoredUnit, action: &RemediationAction) -> Option<String> {
        match action.kind {
            ActionKind::Scale => Some(service_lock_key(&action.target)),
            ActionKind::Recreate => Some(format!("{}{}", subject.name, self.recreate_suffix)),
            ActionKind::Restart | ActionKind::None => None,
        }
    }

    async fn process_unit(&self, unit: MonitoredUnit) -> UnitResult {
        let Some(_guard) = self.locks.try_acquire(&unit.name) else {
            debug!(unit = %unit.name, "Action in flight, skipping");
            return UnitResult::Busy;
        };

        let raw = self.observer.sample(&unit).await;
        let now = Utc::now();

        let decided = {
            let mut table = self.table();
            let service = unit.scale_target().and_then(|s| table.service(s)).cloned();
            let Some(record) = table.get_mut(&unit.id) else {
                return UnitResult::Gone;
            };

            if record.fault.is_some_and(|f| f.is_expired(now)) {
                record.fault = None;
                self.activity.append(
                    EventDraft::notice(
                        Severity::Info,
                        NoticeKind::FaultCleared,
                        format!("{} fault override expired", record.unit.name),
                    )
                    .for_unit(&record.unit),
                );
            }
            let mode = record.fault.map(|f| f.mode);
            let prior = record.snapshot.take();
            let effective = self.policy.classify(&raw, prior.as_ref(), mode);

            if let Some(from) = detect_transition(prior.as_ref(), &effective) {
                self.activity
                    .append(EventDraft::transition(&record.unit, from, &effective));
            }
            if effective.health_state == HealthState::Healthy {
                record.history.reset();
            }

            let action = self.policy.decide(&DecisionInput {
                unit: &record.unit,
                current: &raw,
                prior: prior.as_ref(),
                mode,
                history: &record.history,
                scale_history: service.as_ref().map(|s| &s.history),
                elevated_polls: service.as_ref().map_or(0, |s| s.elevated_polls),
                now,
            });
            record.snapshot = Some(effective);
            let subject = record.unit.clone();

            if action.is_none() {
                Step::Idle
            } else {
                let held = match self.action_lock_key(&subject, &action) {
                    Some(key) => match self.locks.try_acquire(&key) {
                        Some(guard) => Some(Some(guard)),
                        None => {
                            debug!(unit = %subject.name, lock = %key, kind = %action.kind, "Action lock held, deferring");
                            None
                        }
                    },
                    None => Some(None),
                };
                match held {
                    None => Step::Deferred,
                    Some(guard) => {
                        if action.kind == ActionKind::Scale {
                            let service = table.service_mut(&action.target);
                            service.history.record_start(action.kind, now);
                            service.elevated_polls = 0;
                        } else if let Some(record) = table.get_mut(&subject.id) {
                            record.history.record_start(action.kind, now);
                        }
                        Step::Act(action, subject, guard)
                    }
                }
            }
        };
        self.publish_status();

        let (action, subject, _action_guard) = match decided {
            Step::Idle => return UnitResult::Observed,
            Step::Deferred => return UnitResult::Busy,
            Step::Act(action, subject, guard) => (action, subject, guard),
        };
        let outcome = self.executor.execute(Some(&subject), &action).await;
        self.apply_outcome(&subject, &outcome);
        UnitResult::Acted {
            success: outcome.success,
        }
    }

    /// Fold an executor outcome back into the unit table.
    fn apply_outcome(&self, subject: &MonitoredUnit, outcome: &ActionOutcome) {
        {
            let mut table = self.table();
            if outcome.action == ActionKind::Scale {
                if let Some(service) = subject.scale_target() {
                    record_scale_outcome(&mut table, service, outcome);
                }
            } else if let Some(record) = table.get_mut(&subject.id) {
                record.history.record_outcome(outcome);
                record.last_outcome = Some(outcome.clone());

                let remediated = outcome.success
                    && matches!(outcome.action, ActionKind::Restart | ActionKind::Recreate);
                if remediated && record.fault.is_some_and(|f| f.mode == FaultMode::Down) {
                    record.fault = None;
                    self.activity.append(
                        EventDraft::notice(
                            Severity::Info,
                            NoticeKind::FaultCleared,
                            format!("{} fault cleared by {}", record.unit.name, outcome.action),
                        )
                        .for_unit(&record.unit),
                    );
                }
            }

            if outcome.action == ActionKind::Recreate {
                if let Some(new_id) = outcome.new_unit_id.as_deref() {
                    table.rekey(&subject.id, new_id);
                }
            }

            let vanished = outcome.failure_kind() == Some(FailureKind::UnitNotFound)
                && outcome.action != ActionKind::Scale;
            if vanished && table.remove(&subject.id).is_some() {
                info!(unit = %subject.name, id = %subject.display_id, "Unit vanished, dropped from tracking");
                self.activity.append(
                    EventDraft::notice(
                        Severity::Warning,
                        NoticeKind::UnitRemoved,
                        format!("{} disappeared during {}", subject.name, outcome.action),
                    )
                    .for_unit(subject),
                );
            }
        }
        self.publish_status();
    }

    // ========================================================================
    // Operator Commands
    // ========================================================================

    /// Look a unit up, refreshing the table once if it is not known yet.
    async fn resolve_unit(&self, key: &str) -> Result<MonitoredUnit, CommandError> {
        let found = |table: &UnitTable| {
            table
                .resolve(key)
                .and_then(|id| table.get(&id).map(|r| r.unit.clone()))
        };
        if let Some(unit) = found(&self.table()) {
            return Ok(unit);
        }
        if let Ok(units) = self.observer.discover().await {
            self.reconcile(&units);
            self.publish_status();
        }
        found(&self.table()).ok_or_else(|| CommandError::UnitNotFound(key.to_string()))
    }

    /// Operator entry point: install a fault override, or heal right away.
    ///
    /// `heal` restarts the unit, or recreates it when `escalate` is set.
    pub async fn trigger_action(
        &self,
        key: &str,
        mode: TriggerMode,
        escalate: bool,
    ) -> Result<TriggerResult, CommandError> {
        let unit = self.resolve_unit(key).await?;
        let _guard = self
            .locks
            .acquire_within(&unit.name, self.action_timeout)
            .await
            .ok_or_else(|| CommandError::Busy(unit.name.clone()))?;

        // The unit may have been recreated or dropped while we waited.
        let unit = self.resolve_unit(&unit.name).await?;

        if let Some(fault) = mode.fault_mode() {
            let now = Utc::now();
            let fault_override = FaultOverride::new(fault, now, self.policy.fault_ttl());
            {
                let mut table = self.table();
                let record = table
                    .get_mut(&unit.id)
                    .ok_or_else(|| CommandError::UnitNotFound(key.to_string()))?;
                record.fault = Some(fault_override);
            }
            let severity = if fault == FaultMode::Down { Severity::Warning } else { Severity::Info };
            self.activity.append(
                EventDraft::notice(
                    severity,
                    NoticeKind::FaultInjected,
                    format!(
                        "{} forced {} until {}",
                        unit.name,
                        fault,
                        fault_override.expires_at.format("%H:%M:%S")
                    ),
                )
                .for_unit(&unit),
            );
            self.publish_status();
            return Ok(TriggerResult {
                unit,
                mode,
                fault_override: Some(fault_override),
                outcome: None,
            });
        }

        let action = if escalate {
            RemediationAction::recreate(&unit.id, DecisionReason::OperatorEscalation)
        } else {
            RemediationAction::restart(&unit.id, DecisionReason::OperatorHeal)
        };
        let _replacement_guard = match self.action_lock_key(&unit, &action) {
            Some(key) => Some(
                self.locks
                    .acquire_within(&key, self.action_timeout)
                    .await
                    .ok_or_else(|| CommandError::Busy(unit.name.clone()))?,
            ),
            None => None,
        };
        if let Some(record) = self.table().get_mut(&unit.id) {
            record.history.record_start(action.kind, Utc::now());
        }
        let outcome = self.executor.execute(Some(&unit), &action).await;
        self.apply_outcome(&unit, &outcome);

        Ok(TriggerResult {
            unit,
            mode,
            fault_override: None,
            outcome: Some(outcome),
        })
    }

    /// Operator scale of a replicated service to an absolute count.
    pub async fn scale_service(&self, service: &str, replicas: u64) -> Result<ActionOutcome, CommandError> {
        if service.trim().is_empty() {
            return Err(CommandError::InvalidArgument("service name is empty".to_string()));
        }
        let _guard = self
            .locks
            .acquire_within(&service_lock_key(service), self.action_timeout)
            .await
            .ok_or_else(|| CommandError::Busy(service.to_string()))?;

        let action = RemediationAction::scale_to(service, replicas, DecisionReason::OperatorScale);
        {
            let mut table = self.table();
            let record = table.service_mut(service);
            record.history.record_start(ActionKind::Scale, Utc::now());
            record.elevated_polls = 0;
        }
        let outcome = self.executor.execute(None, &action).await;

        record_scale_outcome(&mut self.table(), service, &outcome);
        self.publish_status();
        Ok(outcome)
    }

    /// Record an external load figure (0.0-1.0) for a scalable unit.
    pub async fn report_load(&self, key: &str, value: f64) -> Result<MonitoredUnit, CommandError> {
        if !value.is_finite() || value < 0.0 {
            return Err(CommandError::InvalidArgument(format!(
                "load must be a finite number >= 0 (got {value})"
            )));
        }
        let unit = self.resolve_unit(key).await?;
        if !unit.is_scalable() {
            return Err(CommandError::InvalidArgument(format!(
                "{} does not belong to a scalable service",
                unit.name
            )));
        }
        self.reported_load.report(&unit.name, value);
        debug!(unit = %unit.name, load = value, "Load reported");
        Ok(unit)
    }
}
