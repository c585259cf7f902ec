use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::constants::{ID_BITS, ID_LEN};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::id::NodeId;

struct StaticProbe {
    alive: AtomicBool,
    pings: AtomicUsize,
}

impl StaticProbe {
    fn answering(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            pings: AtomicUsize::new(0),
        })
    }

    fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for StaticProbe {
    async fn ping(&self, _peer: &PeerEntry) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.alive.load(Ordering::SeqCst)
    }
}

fn id(first: u8) -> NodeId {
    let mut bytes = [0u8; ID_LEN];
    bytes[0] = first;
    NodeId(bytes)
}

fn ep(registry: &EndpointRegistry, port: u16) -> Endpoint {
    registry
        .resolve(&format!("udp://127.0.0.1:{}", port))
        .unwrap()
}

#[tokio::test]
async fn bucket_moves_refreshed_peer_to_tail() {
    let registry = EndpointRegistry::new();
    let probe = StaticProbe::answering(true);
    let bucket = Bucket::new(3);

    for (i, first) in [0x81u8, 0x82, 0x83].iter().enumerate() {
        bucket
            .touch(id(*first), &[ep(&registry, 1000 + i as u16)], &*probe)
            .await;
    }

    let outcome = bucket
        .touch(id(0x81), &[ep(&registry, 1000)], &*probe)
        .await;
    assert_eq!(outcome, TouchOutcome::Refreshed);

    let order: Vec<u8> = bucket.peers().await.iter().map(|p| p.id.0[0]).collect();
    assert_eq!(order, vec![0x82, 0x83, 0x81]);
    assert_eq!(probe.pings(), 0);
}

#[tokio::test]
async fn full_bucket_keeps_answering_head_and_drops_newcomer() {
    let registry = EndpointRegistry::new();
    let probe = StaticProbe::answering(true);
    let bucket = Bucket::new(2);

    bucket.touch(id(0x81), &[ep(&registry, 1)], &*probe).await;
    bucket.touch(id(0x82), &[ep(&registry, 2)], &*probe).await;

    let outcome = bucket.touch(id(0x83), &[ep(&registry, 3)], &*probe).await;
    assert_eq!(outcome, TouchOutcome::NewcomerDropped);
    assert_eq!(probe.pings(), 1);

    // The probed head moved to the tail; the newcomer is absent.
    let order: Vec<u8> = bucket.peers().await.iter().map(|p| p.id.0[0]).collect();
    assert_eq!(order, vec![0x82, 0x81]);
    assert!(bucket.get(&id(0x83)).await.is_none());
}

#[tokio::test]
async fn full_bucket_evicts_unresponsive_head() {
    let registry = EndpointRegistry::new();
    let probe = StaticProbe::answering(false);
    let bucket = Bucket::new(2);

    bucket.touch(id(0x81), &[ep(&registry, 1)], &*probe).await;
    bucket.touch(id(0x82), &[ep(&registry, 2)], &*probe).await;

    let outcome = bucket.touch(id(0x83), &[ep(&registry, 3)], &*probe).await;
    assert_eq!(outcome, TouchOutcome::HeadEvicted);

    let order: Vec<u8> = bucket.peers().await.iter().map(|p| p.id.0[0]).collect();
    assert_eq!(order, vec![0x82, 0x83]);
    assert!(bucket.len().await <= 2);
}

#[tokio::test]
async fn endpoints_merge_in_insertion_order() {
    let registry = EndpointRegistry::new();
    let probe = StaticProbe::answering(true);
    let bucket = Bucket::new(4);

    let first = ep(&registry, 1);
    let second = ep(&registry, 2);

    bucket.touch(id(0x81), &[first.clone()], &*probe).await;
    bucket
        .touch(id(0x81), &[second.clone(), first.clone()], &*probe)
        .await;

    let peer = bucket.get(&id(0x81)).await.unwrap();
    assert_eq!(peer.endpoints(), &[first, second]);
}

#[tokio::test]
async fn preference_puts_recently_successful_endpoints_first() {
    let registry = EndpointRegistry::new();
    let untried = ep(&registry, 1);
    let proven = ep(&registry, 2);
    registry.on_success(&proven);

    let peer = PeerEntry::new(id(0x81), vec![untried.clone(), proven.clone()]);
    assert_eq!(peer.endpoints_by_preference(), vec![proven, untried]);
}

#[tokio::test]
async fn table_discards_self_update() {
    let registry = EndpointRegistry::new();
    let self_id = id(0x01);
    let table = RoutingTable::new(self_id, 4, StaticProbe::answering(true));

    assert!(table.update(self_id, &[ep(&registry, 1)]).await.is_none());
    assert_eq!(table.len().await, 0);
}

#[tokio::test]
async fn table_places_peers_in_their_distance_bucket() {
    let registry = EndpointRegistry::new();
    let self_id = NodeId([0u8; ID_LEN]);
    let table = RoutingTable::new(self_id, 8, StaticProbe::answering(true));

    for _ in 0..32 {
        let peer = NodeId::generate();
        table.update(peer, &[ep(&registry, 9)]).await;
    }

    for index in 0..ID_BITS {
        for peer in table.bucket_peers(index).await {
            assert_eq!(self_id.bucket_index(&peer.id).unwrap(), index);
        }
    }
}

#[tokio::test]
async fn table_keeps_one_entry_per_id() {
    let registry = EndpointRegistry::new();
    let table = RoutingTable::new(id(0x01), 4, StaticProbe::answering(true));

    table.update(id(0x81), &[ep(&registry, 1)]).await;
    table.update(id(0x81), &[ep(&registry, 2)]).await;

    assert_eq!(table.len().await, 1);
    let peer = table.get(&id(0x81)).await.unwrap();
    assert_eq!(peer.endpoints().len(), 2);
}

#[tokio::test]
async fn repeated_update_only_changes_recency() {
    let registry = EndpointRegistry::new();
    let table = RoutingTable::new(id(0x01), 4, StaticProbe::answering(true));
    let endpoint = ep(&registry, 1);

    table.update(id(0x81), &[endpoint.clone()]).await;
    let before = table.get(&id(0x81)).await.unwrap();

    table.update(id(0x81), &[endpoint.clone()]).await;
    let after = table.get(&id(0x81)).await.unwrap();

    assert_eq!(table.len().await, 1);
    assert_eq!(before.endpoints(), after.endpoints());
    assert!(after.last_seen >= before.last_seen);
}

#[tokio::test]
async fn select_returns_closest_first() {
    let registry = EndpointRegistry::new();
    let table = RoutingTable::new(NodeId([0u8; ID_LEN]), 8, StaticProbe::answering(true));

    for first in [0x10u8, 0x20, 0x08] {
        table.update(id(first), &[ep(&registry, first as u16)]).await;
    }

    let closest = table.select(&id(0x18), 3).await;
    let order: Vec<u8> = closest.iter().map(|p| p.id.0[0]).collect();
    assert_eq!(order, vec![0x10, 0x08, 0x20]);

    let top_two = table.select(&id(0x18), 2).await;
    assert_eq!(top_two.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn untouched_buckets_go_stale() {
    let registry = EndpointRegistry::new();
    let table = RoutingTable::new(id(0x01), 4, StaticProbe::answering(true));

    assert!(table.stale_buckets(Duration::from_secs(3600)).is_empty());

    tokio::time::advance(Duration::from_secs(2 * 3600)).await;
    assert_eq!(table.stale_buckets(Duration::from_secs(3600)).len(), ID_BITS);

    table.update(id(0x81), &[ep(&registry, 1)]).await;
    let index = id(0x01).bucket_index(&id(0x81)).unwrap();
    assert!(!table
        .stale_buckets(Duration::from_secs(3600))
        .contains(&index));
}
