//! Activity Persistence Tests
//!
//! The activity log written through to sled survives an engine restart and
//! keeps numbering events where it left off.

use sentinel::activity::{ActivityLog, ActivityStore, FeedQuery};
use sentinel::config::SentinelConfig;
use sentinel::engine::Engine;
use sentinel::runtime::InMemoryRuntime;
use sentinel::types::HealthState;

use std::sync::Arc;

fn engine_over(runtime: &Arc<InMemoryRuntime>, path: &std::path::Path) -> Engine {
    let config = SentinelConfig::default();
    let store = ActivityStore::open(path).unwrap();
    let activity = Arc::new(ActivityLog::with_store(config.activity.capacity, store));
    Engine::new(&config, runtime.clone(), activity)
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("activity");
    let runtime = Arc::new(InMemoryRuntime::demo());

    let before = {
        let engine = engine_over(&runtime, &path);
        runtime.set_health("auth-service", HealthState::Unhealthy, 1);
        engine.run_cycle().await;
        engine.feed(&FeedQuery::default())
    };
    assert!(!before.is_empty());

    let engine = engine_over(&runtime, &path);
    let restored = engine.feed(&FeedQuery::default());
    assert_eq!(restored, before);

    let last_seq = before.last().unwrap().seq;
    runtime.set_health("auth-service", HealthState::Healthy, 0);
    engine.run_cycle().await;

    let after = engine.feed(&FeedQuery::default());
    assert!(after.len() > before.len());
    assert!(after[before.len()..].iter().all(|e| e.seq > last_seq));
}

#[tokio::test]
async fn test_store_is_bounded_by_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let store = ActivityStore::open(dir.path().join("activity")).unwrap();
    let log = ActivityLog::with_store(4, store.clone());

    for i in 0..10 {
        log.append(sentinel::types::EventDraft::notice(
            sentinel::types::Severity::Info,
            sentinel::types::NoticeKind::FaultCleared,
            format!("event {i}"),
        ));
    }

    assert_eq!(log.len(), 4);
    assert!(store.count() <= 8);
    let kept = store.recent(4);
    assert_eq!(kept.last().unwrap().message, "event 9");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_all_persist() {
    let dir = tempfile::tempdir().unwrap();
    let store = ActivityStore::open(dir.path().join("activity")).unwrap();
    let log = Arc::new(ActivityLog::with_store(200, store.clone()));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let log = log.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    log.append(sentinel::types::EventDraft::notice(
                        sentinel::types::Severity::Info,
                        sentinel::types::NoticeKind::FaultInjected,
                        format!("writer {w} event {i}"),
                    ));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(log.len(), 100);
    assert_eq!(store.count(), 100);
    let seqs: Vec<u64> = store.recent(100).iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=100).collect::<Vec<u64>>());
}
