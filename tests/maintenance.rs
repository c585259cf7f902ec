#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{low_id, spawn_node, test_config, uri, Responder, NETWORK};
use rkad::KadConfig;

#[tokio::test]
async fn primary_values_republish_on_schedule() {
    let config = KadConfig {
        republish_interval: Duration::from_millis(100),
        replicate_interval: Duration::from_secs(3600),
        expire_interval: Duration::from_millis(25),
        ..test_config()
    };
    let node = spawn_node(config, low_id(0x01)).await;

    let peer = Responder::spawn(NETWORK).await;
    node.ping(peer.uri()).await.unwrap();

    node.put(low_id(0x40), Bytes::from_static(b"v"), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(peer.store_count(), 1, "the put itself stores once");

    // Three republish deadlines pass; each one re-stores the value.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(
        peer.store_count() >= 3,
        "expected republishes, saw {} stores",
        peer.store_count()
    );
}

#[tokio::test]
async fn replicate_freshens_replicas_independently() {
    let config = KadConfig {
        republish_interval: Duration::from_secs(3600),
        replicate_interval: Duration::from_millis(100),
        expire_interval: Duration::from_millis(25),
        ..test_config()
    };
    let node = spawn_node(config, low_id(0x01)).await;

    let peer = Responder::spawn(NETWORK).await;
    node.ping(peer.uri()).await.unwrap();

    node.put(low_id(0x41), Bytes::from_static(b"v"), Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(
        peer.store_count() >= 2,
        "expected replication stores, saw {}",
        peer.store_count()
    );
}

#[tokio::test]
async fn expired_values_disappear_on_both_sides() {
    let a = spawn_node(test_config(), low_id(0x01)).await;
    let b = spawn_node(test_config(), low_id(0x02)).await;
    b.connect(&uri(&a)).await.unwrap();

    let key = low_id(0x42);
    b.put(key, Bytes::from_static(b"gone soon"), Duration::from_millis(150))
        .await
        .unwrap();
    assert!(a.store().get(&key).is_some(), "replica landed");

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(b.store().get(&key).is_none(), "primary expired");
    assert!(a.store().get(&key).is_none(), "replica expired");
    // The sweep removed the entries outright.
    assert_eq!(a.store().len(), 0);
    assert_eq!(b.store().len(), 0);
}
