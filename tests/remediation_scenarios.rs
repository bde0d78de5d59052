//! Remediation Scenario Tests
//!
//! Drives the engine cycle by cycle against the in-memory runtime and checks
//! the calls it makes, the state it publishes and the activity it records.

use sentinel::activity::{ActivityLog, FeedQuery};
use sentinel::config::SentinelConfig;
use sentinel::engine::{CommandError, Engine, TriggerMode};
use sentinel::runtime::{InMemoryRuntime, RuntimeCall, RuntimeError, RuntimeGateway, RuntimeOperation};
use sentinel::types::{
    ActionKind, ActivityEvent, DecisionReason, EventPayload, FailureKind, HealthState, NoticeKind,
    OutcomeStatus, Severity,
};

use std::sync::Arc;

fn test_config() -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.observer.health_timeout_ms = 500;
    config.observer.cycle_timeout_ms = 5_000;
    config.executor.action_timeout_ms = 2_000;
    config
}

fn build(runtime: &Arc<InMemoryRuntime>, config: &SentinelConfig) -> Engine {
    let activity = Arc::new(ActivityLog::new(config.activity.capacity));
    Engine::new(config, runtime.clone(), activity)
}

fn events(engine: &Engine) -> Vec<ActivityEvent> {
    engine.feed(&FeedQuery::default())
}

fn notices(engine: &Engine, kind: NoticeKind) -> usize {
    events(engine)
        .iter()
        .filter(|e| matches!(&e.payload, EventPayload::Notice { notice } if *notice == kind))
        .count()
}

fn transitions_to(engine: &Engine, unit: &str, state: HealthState) -> usize {
    events(engine)
        .iter()
        .filter(|e| e.unit_name.as_deref() == Some(unit))
        .filter(|e| matches!(&e.payload, EventPayload::Transition { to, .. } if *to == state))
        .count()
}

fn health_of(engine: &Engine, unit: &str) -> Option<HealthState> {
    engine
        .unit_status(unit)
        .and_then(|s| s.snapshot.map(|snap| snap.health_state))
}

/// Scenario A: a single failing check triggers one restart, recovery is
/// recorded and nothing else happens afterwards.
#[tokio::test]
async fn test_unhealthy_unit_restarted_then_recovers() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let id = runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 1);
    let engine = build(&runtime, &test_config());

    let report = engine.run_cycle().await;
    assert_eq!(report.actions, 1);
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    assert!(runtime.calls().contains(&RuntimeCall::Restart(id.clone())));
    assert_eq!(transitions_to(&engine, "auth-service", HealthState::Unhealthy), 1);

    let status = engine.unit_status("auth-service").unwrap();
    let outcome = status.last_outcome.unwrap();
    assert_eq!(outcome.action, ActionKind::Restart);
    assert!(outcome.success);
    assert!(status.last_action_at.is_some());

    runtime.set_health("auth-service", HealthState::Healthy, 0);
    let report = engine.run_cycle().await;
    assert_eq!(report.actions, 0);
    assert_eq!(transitions_to(&engine, "auth-service", HealthState::Healthy), 1);

    let recovery = events(&engine)
        .into_iter()
        .rev()
        .find(|e| matches!(e.payload, EventPayload::Transition { .. }))
        .unwrap();
    assert_eq!(recovery.severity, Severity::Info);

    engine.run_cycle().await;
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    assert_eq!(health_of(&engine, "auth-service"), Some(HealthState::Healthy));
}

/// Scenario B: once a restart has failed and the streak passes the
/// recreate threshold, the unit is rebuilt under the same name.
#[tokio::test]
async fn test_failed_restart_escalates_to_recreate() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let old_id = runtime.add_scalable_container("payments-worker", "payments:1", "payments");
    runtime.set_health("payments-worker", HealthState::Unhealthy, 1);
    runtime.fail_next(
        RuntimeOperation::Restart,
        RuntimeError::command_failed(RuntimeOperation::Restart, "container is dead"),
    );
    let engine = build(&runtime, &test_config());

    engine.run_cycle().await;
    let first = engine.unit_status("payments-worker").unwrap().last_outcome.unwrap();
    assert_eq!(first.action, ActionKind::Restart);
    assert!(!first.success);

    runtime.set_health("payments-worker", HealthState::Unhealthy, 4);
    engine.run_cycle().await;

    let status = engine.unit_status("payments-worker").unwrap();
    let outcome = status.last_outcome.unwrap();
    assert_eq!(outcome.action, ActionKind::Recreate);
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.reason, DecisionReason::RestartDidNotRecover);

    let new_id = outcome.new_unit_id.unwrap();
    assert_ne!(new_id, old_id);
    assert_eq!(status.unit.id, new_id);
    assert_eq!(status.unit.name, "payments-worker");
    assert_eq!(status.unit.service_name.as_deref(), Some("payments"));

    let (unit, running) = runtime.unit_by_name("payments-worker").unwrap();
    assert_eq!(unit.id, new_id);
    assert!(running);
    assert!(runtime.unit_by_name("payments-worker-new").is_none());
    assert_eq!(runtime.unit_count(), 1);

    // The replacement is tracked under its new id on the next listing.
    engine.run_cycle().await;
    assert_eq!(engine.status().units.len(), 1);
    assert_eq!(health_of(&engine, "payments-worker"), Some(HealthState::Starting));
}

/// Scenario C: if the old unit cannot be inspected, nothing is created and
/// the old unit is left alone.
#[tokio::test]
async fn test_recreate_inspect_failure_leaves_old_unit() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let old_id = runtime.add_container("payments-worker", "payments:1");
    runtime.set_health("payments-worker", HealthState::Unhealthy, 3);
    let engine = build(&runtime, &test_config());

    runtime.fail_next(
        RuntimeOperation::Inspect,
        RuntimeError::command_failed(RuntimeOperation::Inspect, "inspect refused"),
    );
    let result = engine
        .trigger_action("payments-worker", TriggerMode::Heal, true)
        .await
        .unwrap();

    let outcome = result.outcome.unwrap();
    assert_eq!(outcome.action, ActionKind::Recreate);
    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, FailureKind::CommandFailed);
    assert_eq!(runtime.call_count(RuntimeOperation::Create), 0);
    assert_eq!(runtime.call_count(RuntimeOperation::Stop), 0);

    let (unit, running) = runtime.unit_by_name("payments-worker").unwrap();
    assert_eq!(unit.id, old_id);
    assert!(running);

    let critical = events(&engine)
        .into_iter()
        .filter(|e| matches!(e.payload, EventPayload::Outcome { .. }))
        .last()
        .unwrap();
    assert_eq!(critical.severity, Severity::Critical);
}

/// Scenario D: a concurrent service update makes the first scale fail with
/// a retryable error; the retry goes through.
#[tokio::test]
async fn test_scale_version_conflict_is_retryable() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_service("payments", 2);
    let engine = build(&runtime, &test_config());

    runtime.race_next_service_update();
    let first = engine.scale_service("payments", 5).await.unwrap();
    assert!(!first.success);
    assert!(first.is_retryable());
    assert_eq!(runtime.service_replicas("payments"), Some(2));

    let second = engine.scale_service("payments", 5).await.unwrap();
    assert!(second.success);
    assert_eq!(second.replicas, Some(5));
    assert_eq!(runtime.service_replicas("payments"), Some(5));
}

#[tokio::test]
async fn test_scale_unknown_service_fails_not_found() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let engine = build(&runtime, &test_config());

    let outcome = engine.scale_service("ghost", 3).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::UnitNotFound));

    let err = engine.scale_service("  ", 3).await.unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_repeat_decision_within_cooldown_runs_once() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 1);
    let engine = build(&runtime, &test_config());

    engine.run_cycle().await;
    runtime.set_health("auth-service", HealthState::Unhealthy, 2);
    engine.run_cycle().await;

    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    let status = engine.unit_status("auth-service").unwrap();
    assert!(status.cooldown_until.is_some());
}

#[tokio::test]
async fn test_first_sighting_with_long_streak_restarts_first() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 7);
    let engine = build(&runtime, &test_config());

    engine.run_cycle().await;

    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    assert_eq!(runtime.call_count(RuntimeOperation::Create), 0);
}

#[tokio::test]
async fn test_unhealthy_with_zero_streak_is_ambiguous() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 0);
    let engine = build(&runtime, &test_config());

    let report = engine.run_cycle().await;

    assert_eq!(report.actions, 0);
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 0);
    let snapshot = engine.unit_status("auth-service").unwrap().snapshot.unwrap();
    assert_eq!(snapshot.health_state, HealthState::Unknown);
    assert!(snapshot.ambiguous);
}

#[tokio::test]
async fn test_one_failed_probe_does_not_block_others() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.add_container("notification-service", "notify:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 2);
    runtime.set_health("notification-service", HealthState::Unhealthy, 2);
    runtime.fail_next(
        RuntimeOperation::Health,
        RuntimeError::command_failed(RuntimeOperation::Health, "probe exec failed"),
    );
    let mut config = test_config();
    config.runtime.include_services = false;
    let engine = build(&runtime, &config);

    let report = engine.run_cycle().await;

    assert_eq!(report.observed, 2);
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    let unknown = engine
        .status()
        .units
        .iter()
        .filter(|u| u.health_state() == HealthState::Unknown)
        .count();
    assert_eq!(unknown, 1);
}

#[tokio::test]
async fn test_down_fault_drives_restart_and_clears() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Healthy, 0);
    let engine = build(&runtime, &test_config());

    engine.run_cycle().await;
    assert_eq!(health_of(&engine, "auth-service"), Some(HealthState::Healthy));

    let result = engine
        .trigger_action("auth-service", TriggerMode::Down, false)
        .await
        .unwrap();
    assert!(result.fault_override.is_some());
    assert!(result.outcome.is_none());
    assert_eq!(notices(&engine, NoticeKind::FaultInjected), 1);

    engine.run_cycle().await;
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
    assert_eq!(notices(&engine, NoticeKind::FaultCleared), 1);
    let status = engine.unit_status("auth-service").unwrap();
    assert!(status.fault_override.is_none());

    engine.run_cycle().await;
    assert_eq!(health_of(&engine, "auth-service"), Some(HealthState::Healthy));
    assert_eq!(transitions_to(&engine, "auth-service", HealthState::Healthy), 2);
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 1);
}

#[tokio::test]
async fn test_slow_fault_holds_unit_in_starting() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Unhealthy, 5);
    let engine = build(&runtime, &test_config());

    engine
        .trigger_action("auth-service", TriggerMode::Slow, false)
        .await
        .unwrap();
    engine.run_cycle().await;

    assert_eq!(health_of(&engine, "auth-service"), Some(HealthState::Starting));
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 0);
}

#[tokio::test]
async fn test_heal_restarts_without_policy() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let id = runtime.add_container("auth-service", "auth:1");
    runtime.set_health("auth-service", HealthState::Healthy, 0);
    let engine = build(&runtime, &test_config());

    let result = engine
        .trigger_action(&id[..12], TriggerMode::Heal, false)
        .await
        .unwrap();

    let outcome = result.outcome.unwrap();
    assert_eq!(outcome.action, ActionKind::Restart);
    assert_eq!(outcome.reason, DecisionReason::OperatorHeal);
    assert!(outcome.success);
    assert_eq!(result.unit.name, "auth-service");
}

#[tokio::test]
async fn test_trigger_unknown_unit_is_not_found() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let engine = build(&runtime, &test_config());

    let err = engine
        .trigger_action("ghost", TriggerMode::Down, false)
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::UnitNotFound("ghost".to_string()));
}

#[tokio::test]
async fn test_runtime_unavailable_warns_once() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("auth-service", "auth:1");
    runtime.set_reachable(false);
    let engine = build(&runtime, &test_config());

    let first = engine.run_cycle().await;
    let second = engine.run_cycle().await;

    assert!(first.runtime_unavailable);
    assert!(second.runtime_unavailable);
    assert_eq!(notices(&engine, NoticeKind::RuntimeUnavailable), 1);
    let status = engine.status();
    assert!(!status.runtime_reachable);
    assert_eq!(status.cycle_count, 2);

    runtime.set_reachable(true);
    let third = engine.run_cycle().await;
    assert!(!third.runtime_unavailable);
    assert!(engine.status().runtime_reachable);
    assert_eq!(third.units, 1);
}

#[tokio::test]
async fn test_unlabeled_and_vanished_units() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let id = runtime.add_container("auth-service", "auth:1");
    runtime.add_unmonitored_container("postgres", "postgres:16");
    let mut config = test_config();
    config.runtime.include_services = false;
    let engine = build(&runtime, &config);

    engine.run_cycle().await;
    assert_eq!(engine.status().units.len(), 1);
    assert!(engine.unit_status("postgres").is_none());

    runtime.stop(&id, 0).await.unwrap();
    runtime.remove(&id).await.unwrap();
    let report = engine.run_cycle().await;

    assert_eq!(report.removed, 1);
    assert!(engine.unit_status("auth-service").is_none());
    assert_eq!(notices(&engine, NoticeKind::UnitRemoved), 1);
}

#[tokio::test]
async fn test_sustained_load_scales_service() {
    let runtime = Arc::new(InMemoryRuntime::demo());
    let engine = build(&runtime, &test_config());

    engine.report_load("payments-worker", 0.95).await.unwrap();
    let err = engine.report_load("auth-service", 0.95).await.unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgument(_)));
    let err = engine.report_load("payments-worker", f64::NAN).await.unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgument(_)));

    engine.run_cycle().await;
    engine.run_cycle().await;
    assert_eq!(runtime.service_replicas("payments"), Some(2));

    engine.run_cycle().await;
    assert_eq!(runtime.service_replicas("payments"), Some(3));

    let status = engine.unit_status("payments-worker").unwrap();
    let outcome = status.last_outcome.unwrap();
    assert_eq!(outcome.action, ActionKind::Scale);
    assert_eq!(outcome.reason, DecisionReason::SustainedLoad);
    assert_eq!(status.elevated_polls, 0);

    // Still loaded, but the cooldown holds further scaling back.
    for _ in 0..3 {
        engine.run_cycle().await;
    }
    assert_eq!(runtime.service_replicas("payments"), Some(3));
}

/// Three loaded replicas of one service add up to one scale, not three.
#[tokio::test]
async fn test_loaded_replicas_scale_service_once() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_service("payments", 3);
    let replicas = ["pw-1", "pw-2", "pw-3"];
    for name in replicas {
        runtime.add_scalable_container(name, "payments:1", "payments");
        runtime.set_health(name, HealthState::Healthy, 0);
    }
    let config = test_config();
    let engine = build(&runtime, &config);
    for name in replicas {
        engine.report_load(name, 0.95).await.unwrap();
    }

    for _ in 0..config.policy.load_sustain_polls {
        engine.run_cycle().await;
    }
    assert_eq!(runtime.service_replicas("payments"), Some(4));
    assert_eq!(runtime.call_count(RuntimeOperation::UpdateService), 1);
    for name in replicas {
        let status = engine.unit_status(name).unwrap();
        assert_eq!(status.last_outcome.unwrap().action, ActionKind::Scale);
        assert_eq!(status.elevated_polls, 0);
    }

    for _ in 0..config.policy.load_sustain_polls {
        engine.run_cycle().await;
    }
    assert_eq!(runtime.service_replicas("payments"), Some(4));
}

/// A poll that lists units while an operator recreate is between removing
/// the old container and renaming the new one keeps the unit's record.
#[tokio::test]
async fn test_poll_during_operator_recreate_keeps_record() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let old_id = runtime.add_container("payments-worker", "payments:1");
    runtime.set_health("payments-worker", HealthState::Healthy, 0);
    let mut config = test_config();
    config.runtime.include_services = false;
    let engine = Arc::new(build(&runtime, &config));
    engine.run_cycle().await;

    runtime.set_latency(RuntimeOperation::Rename, std::time::Duration::from_millis(300));
    let heal = tokio::spawn({
        let engine = engine.clone();
        async move { engine.trigger_action("payments-worker", TriggerMode::Heal, true).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let report = engine.run_cycle().await;
    assert_eq!(report.removed, 0);
    assert_eq!(report.skipped_busy, 1);
    assert_eq!(runtime.call_count(RuntimeOperation::Restart), 0);

    let outcome = heal.await.unwrap().unwrap().outcome.unwrap();
    assert!(outcome.success);
    let new_id = outcome.new_unit_id.unwrap();
    assert_ne!(new_id, old_id);

    let status = engine.unit_status("payments-worker").unwrap();
    assert_eq!(status.unit.id, new_id);
    assert!(status.last_action_at.is_some());
    assert_eq!(status.last_outcome.unwrap().action, ActionKind::Recreate);
    assert_eq!(engine.status().units.len(), 1);
    assert_eq!(notices(&engine, NoticeKind::UnitRemoved), 0);

    engine.run_cycle().await;
    assert_eq!(engine.status().units.len(), 1);
    assert_eq!(engine.unit_status("payments-worker").unwrap().unit.id, new_id);
}

/// A recreate whose rename fails leaves the replacement under its
/// temporary name; the record follows it there with its history.
#[tokio::test]
async fn test_partial_recreate_follows_replacement() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_container("payments-worker", "payments:1");
    runtime.set_health("payments-worker", HealthState::Healthy, 0);
    let mut config = test_config();
    config.runtime.include_services = false;
    let engine = build(&runtime, &config);
    engine.run_cycle().await;

    runtime.fail_next(RuntimeOperation::Rename, RuntimeError::conflict(RuntimeOperation::Rename, "name in use"));
    let outcome = engine
        .trigger_action("payments-worker", TriggerMode::Heal, true)
        .await
        .unwrap()
        .outcome
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Partial);
    let new_id = outcome.new_unit_id.clone().unwrap();

    let status = engine.unit_status("payments-worker").unwrap();
    assert_eq!(status.unit.id, new_id);
    let last = status.last_outcome.unwrap();
    assert_eq!(last.status, OutcomeStatus::Partial);
    assert!(last.cleanup_error.unwrap().contains("rename replacement"));

    engine.run_cycle().await;
    assert!(engine.unit_status("payments-worker").is_none());
    let status = engine.unit_status("payments-worker-new").unwrap();
    assert_eq!(status.unit.id, new_id);
    assert!(status.last_action_at.is_some());
    assert_eq!(engine.status().units.len(), 1);
    assert_eq!(notices(&engine, NoticeKind::UnitRemoved), 0);
}

#[tokio::test]
async fn test_activity_sequence_is_ordered() {
    let runtime = Arc::new(InMemoryRuntime::demo());
    let engine = build(&runtime, &test_config());

    engine.run_cycle().await;
    runtime.set_health("auth-service", HealthState::Unhealthy, 1);
    engine.run_cycle().await;

    let all = events(&engine);
    assert!(all.len() >= 4);
    for pair in all.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    let last_two = engine.feed(&FeedQuery::last(2));
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[1].seq, all[all.len() - 1].seq);
}
