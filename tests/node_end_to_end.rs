#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use common::{low_id, spawn_node, test_config, uri, NETWORK};
use rkad::constants::MAX_DATAGRAM_SIZE;
use rkad::proto::{
    Codec, Message, MessageSequence, MsgpackCodec, Request, RequestBody, ResponseBody,
    ResponseStatus, StoreRequest, StoreStatus,
};
use rkad::{KadConfig, KadError, StoreMode};

#[tokio::test]
async fn connect_seeds_both_routing_tables() {
    let a = spawn_node(test_config(), low_id(0x01)).await;
    let b = spawn_node(test_config(), low_id(0x02)).await;

    b.connect(&uri(&a)).await.unwrap();

    let a_in_b = b.router().get(a.id()).await.expect("b learned a");
    assert_eq!(a_in_b.endpoints()[0].uri(), uri(&a));
    assert!(a.router().get(b.id()).await.is_some(), "a learned b");

    // Each peer sits in the bucket its distance dictates.
    let index = b.id().bucket_index(a.id()).unwrap();
    assert!(b
        .router()
        .bucket_peers(index)
        .await
        .iter()
        .any(|p| &p.id == a.id()));
}

#[tokio::test]
async fn lookup_walks_the_overlay_toward_the_target() {
    // a knows only b; b knows c. A lookup for c's id from a must
    // relay through b and come back [c, b], closest first.
    let a = spawn_node(test_config(), low_id(0x01)).await;
    let b = spawn_node(test_config(), low_id(0x80)).await;
    let c = spawn_node(test_config(), low_id(0xFF)).await;

    c.connect(&uri(&b)).await.unwrap();
    a.ping(&uri(&b)).await.unwrap();

    let found = a.find_node(*c.id()).await;
    let ids: Vec<_> = found.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![*c.id(), *b.id()]);
}

#[tokio::test]
async fn messages_from_a_foreign_network_are_dropped() {
    let a = spawn_node(test_config(), low_id(0x01)).await;

    let mut foreign = test_config();
    foreign.network_id += 1;
    foreign.request_timeout = Duration::from_millis(200);
    let b = spawn_node(foreign, low_id(0x02)).await;

    // a never answers: the ping times out rather than erroring.
    let result = b.ping(&uri(&a)).await;
    assert!(matches!(result, Err(KadError::Timeout)));
    assert!(a.router().get(b.id()).await.is_none());
}

#[tokio::test]
async fn a_store_without_a_value_fails_the_envelope() {
    let a = spawn_node(test_config(), low_id(0x01)).await;

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Request::new(
        low_id(0x02),
        9,
        RequestBody::Store(StoreRequest {
            key: low_id(0x40),
            mode: StoreMode::Replica,
            value: None,
        }),
    );
    let seq = MessageSequence::single(NETWORK, Message::Request(request));
    let frame = MsgpackCodec.encode(&seq).unwrap();
    socket.send_to(&frame, a.local_addr()).await.unwrap();

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("a replies")
        .unwrap();

    let reply = MsgpackCodec.decode(&buf[..n]).unwrap();
    match &reply.messages[0] {
        Message::Response(resp) => {
            assert_eq!(resp.header.reply_id, 9);
            assert_eq!(resp.status, ResponseStatus::Failure);
            match &resp.body {
                ResponseBody::Store(sr) => assert_eq!(sr.status, StoreStatus::Invalid),
                other => panic!("wrong body: {:?}", other),
            }
        }
        other => panic!("wrong message: {:?}", other),
    }
    assert!(a.store().get(&low_id(0x40)).is_none(), "nothing was stored");
}

#[tokio::test]
async fn nodes_shut_down_cleanly() {
    let config = KadConfig {
        expire_interval: Duration::from_millis(20),
        ..test_config()
    };
    let a = spawn_node(config, low_id(0x01)).await;
    let b = spawn_node(test_config(), low_id(0x02)).await;
    b.connect(&uri(&a)).await.unwrap();

    a.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // a no longer answers.
    let result = b.ping(&uri(&a)).await;
    assert!(result.is_err());
}
