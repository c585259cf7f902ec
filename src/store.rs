//! Local value store with versioning, TTL, and republish schedules.
//!
//! Entries are either *primary* (originated by this node, so we own
//! the republish and replicate schedules for them) or *replica* (held
//! on behalf of another node, honoring only the TTL). Versions for a
//! key only move forward; a write with an older version is refused.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::KadError;
use crate::id::NodeId;
use crate::proto::ValueInfo;

/// Whether an entry originates here or is cached for someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    Primary,
    Replica,
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: ValueInfo,
    mode: StoreMode,
    expire_at: Instant,
    republish_at: Option<Instant>,
    replicate_at: Option<Instant>,
}

pub struct ValueStore {
    entries: RwLock<HashMap<NodeId, StoreEntry>>,
    republish_interval: Duration,
    replicate_interval: Duration,
}

impl ValueStore {
    pub fn new(republish_interval: Duration, replicate_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            republish_interval,
            replicate_interval,
        }
    }

    /// Accept a value if its version is not older than what we hold.
    ///
    /// An equal version is an idempotent refresh: the expiry window
    /// restarts but the payload is unchanged. Primary entries also
    /// get republish and replicate schedules; replicas only expire.
    pub fn set(&self, key: NodeId, mode: StoreMode, value: ValueInfo) -> Result<(), KadError> {
        let mut entries = self.entries.write();

        if let Some(current) = entries.get(&key) {
            if value.version < current.value.version {
                return Err(KadError::StaleVersion {
                    offered: value.version,
                    current: current.value.version,
                });
            }
        }

        let now = Instant::now();
        let (republish_at, replicate_at) = match mode {
            StoreMode::Primary => (
                Some(now + self.republish_interval),
                Some(now + self.replicate_interval),
            ),
            StoreMode::Replica => (None, None),
        };

        let expire_at = now + value.ttl;
        entries.insert(
            key,
            StoreEntry {
                value,
                mode,
                expire_at,
                republish_at,
                replicate_at,
            },
        );
        Ok(())
    }

    /// Current value for `key`, if present and not past its TTL.
    pub fn get(&self, key: &NodeId) -> Option<ValueInfo> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expire_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn keys(&self) -> Vec<NodeId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The next acceptable version for `key`.
    pub fn next_version(&self, key: &NodeId) -> u64 {
        self.entries
            .read()
            .get(key)
            .map(|e| e.value.version + 1)
            .unwrap_or(1)
    }

    /// Drop entries past their TTL; returns how many were removed.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expire_at > now);
        before - entries.len()
    }

    /// Primary entries due for republication. Harvesting resets each
    /// entry's schedule so one deadline fires exactly once.
    pub fn due_for_republish(&self) -> Vec<(NodeId, ValueInfo)> {
        self.harvest_due(Schedule::Republish, self.republish_interval)
    }

    /// Primary entries due to freshen their replicas.
    pub fn due_for_replicate(&self) -> Vec<(NodeId, ValueInfo)> {
        self.harvest_due(Schedule::Replicate, self.replicate_interval)
    }

    fn harvest_due(&self, schedule: Schedule, interval: Duration) -> Vec<(NodeId, ValueInfo)> {
        let now = Instant::now();
        let mut due = Vec::new();

        let mut entries = self.entries.write();
        for (key, entry) in entries.iter_mut() {
            let slot = match schedule {
                Schedule::Republish => &mut entry.republish_at,
                Schedule::Replicate => &mut entry.replicate_at,
            };
            if matches!(slot, Some(at) if *at <= now) {
                *slot = Some(now + interval);
                due.push((*key, entry.value.clone()));
            }
        }
        due
    }
}

#[derive(Clone, Copy)]
enum Schedule {
    Republish,
    Replicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn value(version: u64, ttl: Duration) -> ValueInfo {
        ValueInfo {
            data: Bytes::from_static(b"hello"),
            version,
            ttl,
        }
    }

    fn store() -> ValueStore {
        ValueStore::new(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    fn key(byte: u8) -> NodeId {
        let mut id = [0u8; crate::constants::ID_LEN];
        id[0] = byte;
        NodeId(id)
    }

    #[tokio::test]
    async fn versions_only_move_forward() {
        let store = store();
        let k = key(0x40);

        store
            .set(k, StoreMode::Primary, value(5, Duration::from_secs(60)))
            .unwrap();

        let err = store
            .set(k, StoreMode::Primary, value(0, Duration::from_secs(60)))
            .unwrap_err();
        assert!(matches!(err, KadError::StaleVersion { offered: 0, current: 5 }));

        store
            .set(k, StoreMode::Primary, value(6, Duration::from_secs(60)))
            .unwrap();
        assert_eq!(store.get(&k).unwrap().version, 6);
    }

    #[tokio::test]
    async fn same_version_set_is_idempotent() {
        let store = store();
        let k = key(0x41);

        let v = value(3, Duration::from_secs(60));
        store.set(k, StoreMode::Replica, v.clone()).unwrap();
        store.set(k, StoreMode::Replica, v.clone()).unwrap();

        assert_eq!(store.get(&k).unwrap(), v);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replica_expires_after_ttl() {
        let store = store();
        let k = key(0x42);

        store
            .set(k, StoreMode::Replica, value(1, Duration::from_millis(50)))
            .unwrap();
        assert!(store.get(&k).is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(store.get(&k).is_none());

        assert_eq!(store.expire(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_primaries_republish() {
        let store = ValueStore::new(Duration::from_millis(100), Duration::from_millis(100));

        store
            .set(key(1), StoreMode::Primary, value(1, Duration::from_secs(60)))
            .unwrap();
        store
            .set(key(2), StoreMode::Replica, value(1, Duration::from_secs(60)))
            .unwrap();

        assert!(store.due_for_republish().is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        let due = store.due_for_republish();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, key(1));

        // The schedule was reset by harvesting.
        assert!(store.due_for_republish().is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.due_for_republish().len(), 1);
        assert_eq!(store.due_for_replicate().len(), 1);
    }
}
