use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::bucket::{Bucket, LivenessProbe, PeerEntry, TouchOutcome};
use crate::constants::ID_BITS;
use crate::endpoint::Endpoint;
use crate::id::NodeId;

/// The node's view of the overlay: one bucket per distance shell.
///
/// Our own id is never stored; a self-update is silently discarded.
/// The id-distinctness invariant holds table-wide because an id maps
/// to exactly one bucket and each bucket's lookup-or-insert is atomic.
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<Bucket>,
    probe: Arc<dyn LivenessProbe>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId, k: usize, probe: Arc<dyn LivenessProbe>) -> Self {
        let buckets = (0..ID_BITS).map(|_| Bucket::new(k)).collect();
        Self {
            self_id,
            buckets,
            probe,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Record contact with `id`, learning `endpoints` for it.
    pub async fn update(&self, id: NodeId, endpoints: &[Endpoint]) -> Option<TouchOutcome> {
        let index = self.self_id.bucket_index(&id).ok()?;
        Some(
            self.buckets[index]
                .touch(id, endpoints, &*self.probe)
                .await,
        )
    }

    pub async fn remove(&self, id: &NodeId) -> Option<PeerEntry> {
        let index = self.self_id.bucket_index(id).ok()?;
        self.buckets[index].remove(id).await
    }

    pub async fn get(&self, id: &NodeId) -> Option<PeerEntry> {
        let index = self.self_id.bucket_index(id).ok()?;
        self.buckets[index].get(id).await
    }

    /// Up to `n` known peers, closest to `key` first.
    ///
    /// Walks every bucket and merges by distance; equidistant entries
    /// (only possible for identical ids, which the table excludes)
    /// would tie-break toward the smaller id.
    pub async fn select(&self, key: &NodeId, n: usize) -> Vec<PeerEntry> {
        let mut candidates = Vec::new();
        for bucket in &self.buckets {
            candidates.extend(bucket.peers().await);
        }

        candidates.sort_by(|a, b| {
            a.id.distance(key)
                .cmp(&b.id.distance(key))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(n);
        candidates
    }

    /// Total number of peers across all buckets.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for bucket in &self.buckets {
            total += bucket.len().await;
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn bucket_len(&self, index: usize) -> usize {
        self.buckets[index].len().await
    }

    pub async fn bucket_peers(&self, index: usize) -> Vec<PeerEntry> {
        self.buckets[index].peers().await
    }

    /// Indices of buckets that have not been touched for `max_age`.
    pub fn stale_buckets(&self, max_age: Duration) -> Vec<usize> {
        let now = Instant::now();
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| now.duration_since(b.last_touched()) >= max_age)
            .map(|(i, _)| i)
            .collect()
    }
}
