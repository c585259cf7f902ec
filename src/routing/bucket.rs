use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::id::NodeId;

/// Liveness check a full bucket runs against its oldest peer before
/// deciding between keeping it and evicting it.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn ping(&self, peer: &PeerEntry) -> bool;
}

/// A peer as the routing table sees it: id, the endpoints we know for
/// it in the order we learned them, and when we last heard from it.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: NodeId,
    endpoints: Vec<Endpoint>,
    pub last_seen: Instant,
}

impl PeerEntry {
    pub fn new(id: NodeId, endpoints: Vec<Endpoint>) -> Self {
        Self {
            id,
            endpoints,
            last_seen: Instant::now(),
        }
    }

    /// Known endpoints in insertion order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoints ordered most-recently-successful first; untried ones
    /// keep their insertion order at the back.
    pub fn endpoints_by_preference(&self) -> Vec<Endpoint> {
        let mut endpoints = self.endpoints.clone();
        endpoints.sort_by(|a, b| b.last_success().cmp(&a.last_success()));
        endpoints
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn merge_endpoints(&mut self, endpoints: &[Endpoint]) {
        for ep in endpoints {
            if !self.endpoints.contains(ep) {
                self.endpoints.push(ep.clone());
            }
        }
    }
}

/// What a `touch` did to the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Peer was present; moved to the tail, endpoints merged.
    Refreshed,
    /// Peer was new and the bucket had room.
    Added,
    /// Bucket full, head answered its probe: newcomer dropped.
    NewcomerDropped,
    /// Bucket full, head failed its probe: head evicted, newcomer in.
    HeadEvicted,
}

/// One capacity-k LRU bucket.
///
/// The entry list lives behind an async mutex held across the
/// liveness probe, so touches on one bucket serialize and at most one
/// probe per bucket is in flight; a touch that finds the bucket full
/// while a probe runs queues behind it.
pub struct Bucket {
    entries: Mutex<VecDeque<PeerEntry>>,
    k: usize,
    last_touched: RwLock<Instant>,
}

impl Bucket {
    pub fn new(k: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(k)),
            k,
            last_touched: RwLock::new(Instant::now()),
        }
    }

    /// Record contact with `id`, probing the head on overflow.
    pub async fn touch(
        &self,
        id: NodeId,
        endpoints: &[Endpoint],
        probe: &dyn LivenessProbe,
    ) -> TouchOutcome {
        let mut entries = self.entries.lock().await;
        *self.last_touched.write() = Instant::now();

        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            let mut entry = entries.remove(pos).unwrap();
            entry.merge_endpoints(endpoints);
            entry.touch();
            entries.push_back(entry);
            return TouchOutcome::Refreshed;
        }

        if entries.len() < self.k {
            entries.push_back(PeerEntry::new(id, endpoints.to_vec()));
            return TouchOutcome::Added;
        }

        // Full. The head is the peer we have heard from least
        // recently; it keeps its seat iff it still answers.
        let head = match entries.front() {
            Some(head) => head.clone(),
            None => {
                entries.push_back(PeerEntry::new(id, endpoints.to_vec()));
                return TouchOutcome::Added;
            }
        };

        if probe.ping(&head).await {
            let mut head = entries.pop_front().unwrap();
            head.touch();
            entries.push_back(head);
            debug!(newcomer = %id, kept = %entries.back().unwrap().id, "bucket full, head alive");
            TouchOutcome::NewcomerDropped
        } else {
            let evicted = entries.pop_front().unwrap();
            entries.push_back(PeerEntry::new(id, endpoints.to_vec()));
            debug!(newcomer = %id, evicted = %evicted.id, "bucket full, head unresponsive");
            TouchOutcome::HeadEvicted
        }
    }

    pub async fn remove(&self, id: &NodeId) -> Option<PeerEntry> {
        let mut entries = self.entries.lock().await;
        let pos = entries.iter().position(|e| &e.id == id)?;
        entries.remove(pos)
    }

    pub async fn get(&self, id: &NodeId) -> Option<PeerEntry> {
        let entries = self.entries.lock().await;
        entries.iter().find(|e| &e.id == id).cloned()
    }

    /// Snapshot of the entries, least-recently-seen first.
    pub async fn peers(&self) -> Vec<PeerEntry> {
        let entries = self.entries.lock().await;
        entries.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn last_touched(&self) -> Instant {
        *self.last_touched.read()
    }
}
