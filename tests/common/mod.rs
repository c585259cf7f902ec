#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use rkad::constants::{ID_LEN, MAX_DATAGRAM_SIZE};
use rkad::proto::{
    Codec, FindNodeResponse, FindValueResponse, Message, MessageSequence, MsgpackCodec, NodeInfo,
    PingResponse, Request, RequestBody, Response, ResponseBody, StoreResponse, StoreStatus,
};
use rkad::{KadConfig, KadServer, NodeId};

pub const NETWORK: u64 = 0xC0FFEE;

/// Short timers so the suite runs in seconds, not hours.
pub fn test_config() -> KadConfig {
    KadConfig {
        request_timeout: Duration::from_millis(500),
        expire_interval: Duration::from_millis(50),
        ..KadConfig::for_network(NETWORK)
    }
}

/// An id equal to `value` read as a big-endian integer.
pub fn low_id(value: u8) -> NodeId {
    let mut id = [0u8; ID_LEN];
    id[ID_LEN - 1] = value;
    NodeId(id)
}

/// An id with only the first byte set; handy for steering peers into
/// one far bucket.
pub fn high_id(first: u8) -> NodeId {
    let mut id = [0u8; ID_LEN];
    id[0] = first;
    NodeId(id)
}

pub async fn spawn_node(config: KadConfig, id: NodeId) -> Arc<KadServer> {
    let node = KadServer::bind_with(
        "127.0.0.1:0".parse().unwrap(),
        config,
        id,
        Arc::new(MsgpackCodec),
    )
    .await
    .unwrap();
    tokio::spawn(node.clone().run());
    node
}

pub fn uri(node: &KadServer) -> String {
    format!("udp://{}", node.local_addr())
}

/// A scripted fake peer: answers PING / FIND_NODE / FIND_VALUE with
/// itself and acknowledges every STORE, counting them.
pub struct Responder {
    pub id: NodeId,
    uri: String,
    stores: Arc<AtomicUsize>,
}

impl Responder {
    pub async fn spawn(network: u64) -> Responder {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let id = NodeId::generate();
        let uri = format!("udp://{}", socket.local_addr().unwrap());
        let stores = Arc::new(AtomicUsize::new(0));

        let own_uri = uri.clone();
        let counter = Arc::clone(&stores);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let Ok((n, source)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let Ok(seq) = MsgpackCodec.decode(&buf[..n]) else {
                    continue;
                };
                if seq.network != network {
                    continue;
                }

                for message in seq.messages {
                    let Message::Request(Request { header, body }) = message else {
                        continue;
                    };

                    let self_info = NodeInfo {
                        id,
                        endpoints: vec![own_uri.clone()],
                    };
                    let reply = match body {
                        RequestBody::Ping(_) => ResponseBody::Ping(PingResponse {
                            endpoints: vec![own_uri.clone()],
                        }),
                        RequestBody::Store(_) => {
                            counter.fetch_add(1, Ordering::SeqCst);
                            ResponseBody::Store(StoreResponse {
                                status: StoreStatus::Success,
                            })
                        }
                        RequestBody::FindNode(_) => ResponseBody::FindNode(FindNodeResponse {
                            nodes: vec![self_info],
                        }),
                        RequestBody::FindValue(_) => ResponseBody::FindValue(FindValueResponse {
                            nodes: vec![self_info],
                            value: None,
                        }),
                    };

                    let response = Response::success(id, header.reply_id, reply);
                    let seq = MessageSequence::single(network, Message::Response(response));
                    if let Ok(frame) = MsgpackCodec.encode(&seq) {
                        let _ = socket.send_to(&frame, source).await;
                    }
                }
            }
        });

        Responder { id, uri, stores }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}
