//! Best-effort cross-instance initialization lock
//!
//! A lock is a timestamped record in the shared [`KeyValueStore`]. It counts
//! as held only while younger than the maximum lock duration, so a crashed
//! holder's lock expires on its own. This is not a strict mutex: two
//! instances racing on the same stale record can both win.

use crate::clock::{elapsed_ms, Clock};
use crate::logging::Logger;
use crate::storage::KeyValueStore;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Persisted lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Acquisition time in epoch milliseconds
    pub acquired_at: i64,
    /// Instance that wrote the record (informational)
    #[serde(default)]
    pub holder: Option<Uuid>,
}

impl LockRecord {
    fn acquired_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.acquired_at).single()
    }
}

/// Self-expiring lock over shared storage
pub struct InstanceLock {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    max_duration: Duration,
    holder: Uuid,
    logger: Logger,
}

impl InstanceLock {
    /// Create a lock stored under `key`
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        max_duration: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            max_duration,
            holder: Uuid::new_v4(),
            logger: Logger::new("lock"),
        }
    }

    /// Identifier written into records this instance acquires
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    /// Current lock record if one is held and not stale
    pub fn current(&self) -> Option<LockRecord> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                self.logger.warn(&format!("Failed to read lock record: {}", e));
                return None;
            }
        };

        let record: LockRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(_) => {
                self.logger.debug("Ignoring unparseable lock record");
                return None;
            }
        };

        let acquired = record.acquired_at()?;
        let age = elapsed_ms(acquired, self.clock.now());
        if age < self.max_duration.as_millis() as u64 {
            Some(record)
        } else {
            None
        }
    }

    /// Try to take the lock.
    ///
    /// Returns `false` when another instance holds a fresh lock; callers
    /// should skip their attempt rather than treat this as an error.
    pub fn acquire(&self) -> bool {
        if let Some(existing) = self.current() {
            self.logger.debug(&format!(
                "Lock held by {:?} since {}",
                existing.holder, existing.acquired_at
            ));
            return false;
        }

        let record = LockRecord {
            acquired_at: self.clock.now().timestamp_millis(),
            holder: Some(self.holder),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                self.logger.error(&format!("Failed to encode lock record: {}", e));
                return false;
            }
        };

        if let Err(e) = self.store.set(&self.key, &raw) {
            // Nothing shared to coordinate through; proceed alone.
            self.logger
                .warn(&format!("Failed to write lock record, proceeding unlocked: {}", e));
        }
        true
    }

    /// Drop the lock record, whoever wrote it
    pub fn release(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            self.logger.warn(&format!("Failed to release lock: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::ManualClock;

    fn lock_with(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> InstanceLock {
        InstanceLock::new(store, clock, "beacon:test:init_lock", Duration::from_secs(10))
    }

    #[test]
    fn test_second_acquire_within_window_fails() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let lock = lock_with(store, clock);

        assert!(lock.acquire());
        assert!(!lock.acquire());
    }

    #[test]
    fn test_stale_lock_can_be_reacquired() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let lock = lock_with(store, clock.clone());

        assert!(lock.acquire());
        clock.advance(Duration::from_secs(11));
        assert!(lock.acquire());
    }

    #[test]
    fn test_other_instance_blocked_until_release() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let tab_a = lock_with(store.clone(), clock.clone());
        let tab_b = lock_with(store, clock.clone());

        assert!(tab_a.acquire());
        clock.advance(Duration::from_secs(9));
        assert!(!tab_b.acquire());
        assert_eq!(tab_b.current().unwrap().holder, Some(tab_a.holder()));

        tab_a.release();
        assert!(tab_b.acquire());
    }

    #[test]
    fn test_garbage_record_treated_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set("beacon:test:init_lock", "1699999999999x").unwrap();
        let lock = lock_with(store, Arc::new(ManualClock::default()));
        assert!(lock.current().is_none());
        assert!(lock.acquire());
    }
}
