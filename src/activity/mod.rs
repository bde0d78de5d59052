//! Event/Status Publisher
//!
//! [`ActivityLog`] is the single owner of the activity stream: every other
//! component hands it an [`EventDraft`] and gets back the stamped event.
//! Sequence numbers increase by one per append and timestamps never go
//! backwards, whatever order appends arrive in.
//!
//! [`StatusBoard`] holds the latest immutable status snapshot for readers.

mod status;
mod store;

pub use status::{HealthCounts, StatusBoard, StatusSnapshot, UnitStatus};
pub use store::{ActivityStore, StorageError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::types::{ActivityEvent, EventDraft, Severity};

/// Activity feed filter
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct FeedQuery {
    /// Only the newest N events
    pub limit: Option<usize>,
    /// Only events at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl FeedQuery {
    pub fn last(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            since: None,
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    events: VecDeque<ActivityEvent>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Bounded, append-only activity log with optional sled write-through.
pub struct ActivityLog {
    inner: Mutex<LogInner>,
    capacity: usize,
    store: Option<ActivityStore>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                next_seq: 1,
                last_timestamp: None,
            }),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Log backed by `store`: the newest `capacity` events are restored and
    /// sequence numbers continue after the highest stored one.
    pub fn with_store(capacity: usize, store: ActivityStore) -> Self {
        let log = Self::new(capacity);
        {
            let mut inner = log.lock();
            let restored = store.recent(log.capacity);
            inner.next_seq = store.last_seq().map_or(1, |s| s + 1);
            inner.last_timestamp = restored.last().map(|e| e.timestamp);
            info!(events = restored.len(), next_seq = inner.next_seq, "Restored activity history");
            inner.events.extend(restored);
        }
        Self {
            store: Some(store),
            ..log
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stamp and append an event.
    pub fn append(&self, draft: EventDraft) -> ActivityEvent {
        let event = {
            let mut inner = self.lock();
            let now = Utc::now();
            let timestamp = inner.last_timestamp.map_or(now, |last| last.max(now));
            let event = ActivityEvent::stamp(draft, inner.next_seq, timestamp);
            inner.next_seq += 1;
            inner.last_timestamp = Some(timestamp);
            if inner.events.len() >= self.capacity {
                inner.events.pop_front();
            }
            inner.events.push_back(event.clone());
            event
        };

        // Keyed by seq, so writes may land out of order.
        if let Some(store) = &self.store {
            if let Err(e) = store.append(&event) {
                warn!(seq = event.seq, error = %e, "Failed to persist activity event");
            }
            if event.seq % self.capacity as u64 == 0 {
                if let Err(e) = store.retain_newest(self.capacity) {
                    warn!(error = %e, "Failed to prune activity store");
                }
            }
        }

        let unit = event.unit_name.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Critical => error!(seq = event.seq, unit = %unit, "{}", event.message),
            Severity::Warning => warn!(seq = event.seq, unit = %unit, "{}", event.message),
            Severity::Info => info!(seq = event.seq, unit = %unit, "{}", event.message),
        }
        event
    }

    /// Events matching `query`, oldest first.
    pub fn query(&self, query: &FeedQuery) -> Vec<ActivityEvent> {
        let inner = self.lock();
        let matching: Vec<&ActivityEvent> = inner
            .events
            .iter()
            .filter(|e| query.since.map_or(true, |since| e.timestamp >= since))
            .collect();
        let skip = query
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the newest event, 0 when nothing was ever appended.
    pub fn last_seq(&self) -> u64 {
        self.lock().next_seq - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoticeKind;

    fn notice(msg: &str) -> EventDraft {
        EventDraft::notice(Severity::Info, NoticeKind::UnitRemoved, msg)
    }

    #[test]
    fn test_sequence_and_time_are_monotonic() {
        let log = ActivityLog::new(100);
        let events: Vec<_> = (0..20).map(|i| log.append(notice(&format!("e{i}")))).collect();
        for pair in events.windows(2) {
            assert_eq!(pair[1].seq, pair[0].seq + 1);
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
        assert_eq!(log.last_seq(), 20);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.append(notice(&format!("e{i}")));
        }
        let events = log.query(&FeedQuery::default());
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 3);
        assert_eq!(events[2].seq, 5);
    }

    #[test]
    fn test_query_limit_keeps_newest() {
        let log = ActivityLog::new(10);
        for i in 0..6 {
            log.append(notice(&format!("e{i}")));
        }
        let events = log.query(&FeedQuery::last(2));
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 6]);
    }

    #[test]
    fn test_query_since() {
        let log = ActivityLog::new(10);
        let first = log.append(notice("old"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = log.append(notice("new"));
        let events = log.query(&FeedQuery {
            limit: None,
            since: Some(second.timestamp),
        });
        assert!(events.iter().all(|e| e.seq >= second.seq));
        assert!(events.iter().all(|e| e.seq != first.seq || first.timestamp == second.timestamp));
    }

    #[test]
    fn test_store_restores_and_continues_sequence() {
        let store = ActivityStore::temporary().unwrap();
        {
            let log = ActivityLog::with_store(10, store.clone());
            log.append(notice("a"));
            log.append(notice("b"));
        }
        let log = ActivityLog::with_store(10, store);
        assert_eq!(log.len(), 2);
        let next = log.append(notice("c"));
        assert_eq!(next.seq, 3);
    }
}
