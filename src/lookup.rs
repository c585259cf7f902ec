//! Iterative lookups: the α-parallel FIND_NODE / FIND_VALUE walk.
//!
//! A lookup keeps a *shortlist* of candidates sorted by distance to
//! the target and fans out up to α requests at a time, always to the
//! closest candidate not yet contacted. Responses merge new, closer
//! candidates in; the walk ends once every entry among the k closest
//! has either answered or failed. Each peer is contacted at most once
//! per lookup.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::constants::ID_LEN;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::KadError;
use crate::id::NodeId;
use crate::proto::{
    FindNodeRequest, FindValueRequest, NodeInfo, RequestBody, Response, ResponseBody,
    ResponseStatus, StoreRequest, StoreStatus, ValueInfo,
};
use crate::routing::{PeerEntry, RoutingTable};
use crate::rpc::Invoker;
use crate::store::StoreMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    /// Not yet contacted.
    Pending,
    /// Request dispatched, reply outstanding.
    InFlight,
    /// Answered.
    Queried,
    /// Timed out or errored; not retried within this lookup.
    Failed,
}

struct Candidate {
    peer: PeerEntry,
    distance: [u8; ID_LEN],
    state: CandidateState,
}

/// Distance-ordered working set of a single lookup.
struct Shortlist {
    target: NodeId,
    self_id: NodeId,
    k: usize,
    /// Ascending by (distance to target, id); distinct ids.
    candidates: Vec<Candidate>,
}

impl Shortlist {
    fn new(target: NodeId, self_id: NodeId, k: usize, seed: Vec<PeerEntry>) -> Self {
        let mut shortlist = Self {
            target,
            self_id,
            k,
            candidates: Vec::new(),
        };
        for peer in seed {
            shortlist.insert(peer);
        }
        shortlist
    }

    /// Merge `peer` in, keeping distance order. Duplicates and our
    /// own id are ignored.
    fn insert(&mut self, peer: PeerEntry) {
        if peer.id == self.self_id {
            return;
        }
        if self.candidates.iter().any(|c| c.peer.id == peer.id) {
            return;
        }

        let distance = peer.id.distance(&self.target);
        let pos = self
            .candidates
            .partition_point(|c| (c.distance, c.peer.id) < (distance, peer.id));
        self.candidates.insert(
            pos,
            Candidate {
                peer,
                distance,
                state: CandidateState::Pending,
            },
        );
    }

    /// The closest Pending candidate within the current top-k, if any.
    fn next_candidate(&self) -> Option<PeerEntry> {
        self.candidates
            .iter()
            .take(self.k)
            .find(|c| c.state == CandidateState::Pending)
            .map(|c| c.peer.clone())
    }

    fn mark(&mut self, id: &NodeId, state: CandidateState) {
        if let Some(c) = self.candidates.iter_mut().find(|c| &c.peer.id == id) {
            c.state = state;
        }
    }

    /// The up-to-k closest candidates that answered, closest first.
    fn closest_queried(&self) -> Vec<PeerEntry> {
        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Queried)
            .take(self.k)
            .map(|c| c.peer.clone())
            .collect()
    }
}

/// Outcome of a value lookup.
pub enum FindValueResult {
    Found {
        value: ValueInfo,
        /// Closest answering peer that did not hold the value; the
        /// natural place to cache it on the way out.
        cache_target: Option<PeerEntry>,
    },
    NotFound(Vec<PeerEntry>),
}

/// Runs iterative lookups and STORE broadcasts for one node.
pub struct LookupEngine {
    router: Arc<RoutingTable>,
    invoker: Arc<Invoker>,
    registry: Arc<EndpointRegistry>,
    k: usize,
    alpha: usize,
}

impl LookupEngine {
    pub fn new(
        router: Arc<RoutingTable>,
        invoker: Arc<Invoker>,
        registry: Arc<EndpointRegistry>,
        k: usize,
        alpha: usize,
    ) -> Self {
        Self {
            router,
            invoker,
            registry,
            k,
            alpha,
        }
    }

    /// Iterative FIND_NODE: the k closest reachable peers to `target`.
    pub async fn find_node(&self, target: NodeId) -> Vec<PeerEntry> {
        match self.iterate(target, false).await {
            Iterated::Nodes(peers) => peers,
            Iterated::Value { .. } => unreachable!("node lookup cannot yield a value"),
        }
    }

    /// Iterative FIND_VALUE, short-circuiting on the first hit.
    pub async fn find_value(&self, key: NodeId) -> FindValueResult {
        match self.iterate(key, true).await {
            Iterated::Value {
                value,
                cache_target,
            } => FindValueResult::Found {
                value,
                cache_target,
            },
            Iterated::Nodes(peers) => FindValueResult::NotFound(peers),
        }
    }

    /// Locate the k closest peers to `key` and STORE the value at
    /// each. Succeeds when at least one replica acknowledges.
    pub async fn store(
        &self,
        key: NodeId,
        value: ValueInfo,
        mode: StoreMode,
    ) -> Result<usize, KadError> {
        let peers = self.find_node(key).await;
        if peers.is_empty() {
            return Err(KadError::EndpointNotAvailable);
        }

        let calls = peers.iter().map(|peer| {
            let body = RequestBody::Store(StoreRequest {
                key,
                mode,
                value: Some(value.clone()),
            });
            self.invoker.call(peer, body)
        });

        let acks = join_all(calls)
            .await
            .into_iter()
            .filter(|result| {
                matches!(
                    result,
                    Ok(Response {
                        status: ResponseStatus::Success,
                        body: ResponseBody::Store(store),
                        ..
                    }) if store.status == StoreStatus::Success
                )
            })
            .count();

        debug!(key = %key, acks, replicas = peers.len(), "store broadcast finished");
        if acks > 0 {
            Ok(acks)
        } else {
            Err(KadError::EndpointNotAvailable)
        }
    }

    async fn iterate(&self, target: NodeId, want_value: bool) -> Iterated {
        let seed = self.router.select(&target, self.k).await;
        let mut shortlist = Shortlist::new(target, *self.router.self_id(), self.k, seed);
        let mut in_flight: JoinSet<(NodeId, Result<Response, KadError>)> = JoinSet::new();

        loop {
            // Keep α requests in the air while the top-k still has
            // uncontacted candidates.
            while in_flight.len() < self.alpha {
                let Some(peer) = shortlist.next_candidate() else {
                    break;
                };
                shortlist.mark(&peer.id, CandidateState::InFlight);

                let invoker = Arc::clone(&self.invoker);
                let body = if want_value {
                    RequestBody::FindValue(FindValueRequest { key: target })
                } else {
                    RequestBody::FindNode(FindNodeRequest { key: target })
                };
                in_flight.spawn(async move {
                    let result = invoker.call(&peer, body).await;
                    (peer.id, result)
                });
            }

            // Nothing dispatchable and nothing outstanding: done.
            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let Ok((source, result)) = joined else {
                continue;
            };

            match result {
                Ok(response) => {
                    shortlist.mark(&source, CandidateState::Queried);

                    let (nodes, value) = match response.body {
                        ResponseBody::FindNode(r) => (r.nodes, None),
                        ResponseBody::FindValue(r) => (r.nodes, r.value),
                        _ => (Vec::new(), None),
                    };

                    if want_value {
                        if let Some(value) = value {
                            // Short-circuit; outstanding requests are
                            // aborted when the join set drops.
                            let cache_target = shortlist
                                .closest_queried()
                                .into_iter()
                                .find(|p| p.id != source);
                            return Iterated::Value {
                                value,
                                cache_target,
                            };
                        }
                    }

                    for node in nodes {
                        self.learn(&mut shortlist, node);
                    }
                }
                Err(e) => {
                    trace!(peer = %source, error = %e, "lookup peer failed");
                    shortlist.mark(&source, CandidateState::Failed);
                }
            }
        }

        Iterated::Nodes(shortlist.closest_queried())
    }

    /// Fold a peer learned from a response into the shortlist and the
    /// routing table (endpoints only; the touch happens off the
    /// lookup's critical path).
    fn learn(&self, shortlist: &mut Shortlist, node: NodeInfo) {
        let endpoints: Vec<Endpoint> = node
            .endpoints
            .iter()
            .filter_map(|uri| self.registry.resolve(uri).ok())
            .collect();
        if endpoints.is_empty() {
            return;
        }

        shortlist.insert(PeerEntry::new(node.id, endpoints.clone()));

        let router = Arc::clone(&self.router);
        let id = node.id;
        tokio::spawn(async move {
            router.update(id, &endpoints).await;
        });
    }
}

enum Iterated {
    Nodes(Vec<PeerEntry>),
    Value {
        value: ValueInfo,
        cache_target: Option<PeerEntry>,
    },
}
