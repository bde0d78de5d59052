//! Durable activity history on sled.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::types::ActivityEvent;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Activity events keyed by sequence number.
///
/// Key: `seq` as u64 big-endian bytes (sorts in append order).
/// Value: JSON-serialized [`ActivityEvent`].
#[derive(Clone)]
pub struct ActivityStore {
    db: Arc<sled::Db>,
}

impl ActivityStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Temporary store removed on drop (tests).
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Write one event. Relies on sled's background flushing.
    pub fn append(&self, event: &ActivityEvent) -> Result<(), StorageError> {
        let value = serde_json::to_vec(event)?;
        self.db.insert(event.seq.to_be_bytes(), value)?;
        Ok(())
    }

    /// Newest `limit` events, oldest first. Undecodable entries are skipped.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        let mut events: Vec<ActivityEvent> = self
            .db
            .iter()
            .rev()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice(&value).ok())
            .take(limit)
            .collect();
        events.reverse();
        events
    }

    /// Highest stored sequence number.
    pub fn last_seq(&self) -> Option<u64> {
        self.db.last().ok().flatten().and_then(|(key, _)| {
            let bytes: [u8; 8] = key.as_ref().try_into().ok()?;
            Some(u64::from_be_bytes(bytes))
        })
    }

    pub fn count(&self) -> usize {
        self.db.len()
    }

    /// Drop everything but the newest `keep` events.
    pub fn retain_newest(&self, keep: usize) -> Result<usize, StorageError> {
        let excess = self.db.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }

        let doomed: Vec<_> = self
            .db
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .take(excess)
            .collect();
        for key in &doomed {
            self.db.remove(key)?;
        }
        self.db.flush()?;
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventDraft, NoticeKind, Severity};
    use chrono::Utc;

    fn event(seq: u64) -> ActivityEvent {
        ActivityEvent::stamp(
            EventDraft::notice(Severity::Info, NoticeKind::UnitRemoved, format!("event {seq}")),
            seq,
            Utc::now(),
        )
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let store = ActivityStore::temporary().unwrap();
        for seq in 1..=5 {
            store.append(&event(seq)).unwrap();
        }
        let recent = store.recent(3);
        let seqs: Vec<u64> = recent.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(store.last_seq(), Some(5));
    }

    #[test]
    fn test_retain_newest() {
        let store = ActivityStore::temporary().unwrap();
        for seq in 1..=10 {
            store.append(&event(seq)).unwrap();
        }
        assert_eq!(store.retain_newest(4).unwrap(), 6);
        assert_eq!(store.count(), 4);
        assert_eq!(store.recent(10).first().map(|e| e.seq), Some(7));
    }

    #[test]
    fn test_reopen_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ActivityStore::open(dir.path()).unwrap();
            store.append(&event(1)).unwrap();
            store.append(&event(2)).unwrap();
            store.db.flush().unwrap();
        }
        let store = ActivityStore::open(dir.path()).unwrap();
        assert_eq!(store.last_seq(), Some(2));
    }
}
