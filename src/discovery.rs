//! LAN peer discovery over UDP multicast.
//!
//! A node periodically multicasts a PING request carrying its network
//! id and endpoint URIs. Nodes on the same group and network answer
//! with a unicast PING response; both sides surface the other as a
//! [`DiscoveredPeer`] for the server to `connect` to. Announces from
//! ourselves and from foreign networks are ignored.
//!
//! # Examples
//!
//! ```no_run
//! use rkad::{KadConfig, KadServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = KadServer::bind("0.0.0.0:4000".parse()?, KadConfig::default()).await?;
//! tokio::spawn(node.clone().run());
//!
//! let mut discovered = node.clone().start_discovery().await?;
//! while let Ok(peer) = discovered.recv().await {
//!     println!("heard {} at {:?}", peer.id, peer.endpoints);
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::constants::{DISCOVERY_CHANNEL_CAPACITY, MAX_DATAGRAM_SIZE};
use crate::error::KadError;
use crate::id::NodeId;
use crate::proto::{
    Codec, Message, MessageSequence, PingRequest, PingResponse, Request, RequestBody, Response,
    ResponseBody,
};

/// A peer heard on the multicast group.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub id: NodeId,
    /// The endpoint URIs the peer advertises for its DHT transport.
    pub endpoints: Vec<String>,
    /// Where the multicast or reply datagram came from.
    pub source: SocketAddr,
}

/// Multicast announce/listen loop.
pub struct Discovery {
    socket: UdpSocket,
    group: SocketAddr,
    codec: Arc<dyn Codec>,
    network: u64,
    self_id: NodeId,
    local_endpoints: Vec<String>,
    announce_interval: Duration,
    discovered: broadcast::Sender<DiscoveredPeer>,
}

impl Discovery {
    /// Join `group` (an IPv4 multicast address) and get ready to
    /// announce `local_endpoints` on behalf of `self_id`.
    pub async fn bind(
        group: SocketAddr,
        codec: Arc<dyn Codec>,
        network: u64,
        self_id: NodeId,
        local_endpoints: Vec<String>,
        announce_interval: Duration,
    ) -> Result<Self, KadError> {
        let group_ip = match group.ip() {
            IpAddr::V4(ip) if ip.is_multicast() => ip,
            other => {
                return Err(KadError::InvalidEndpoint(format!(
                    "not an IPv4 multicast group: {}",
                    other
                )))
            }
        };

        let socket =
            UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()))).await?;
        socket.set_multicast_loop_v4(false)?;
        socket.join_multicast_v4(group_ip, Ipv4Addr::UNSPECIFIED)?;

        let (discovered, _) = broadcast::channel(DISCOVERY_CHANNEL_CAPACITY);

        info!(group = %group, id = %self_id, "joined discovery group");

        Ok(Self {
            socket,
            group,
            codec,
            network,
            self_id,
            local_endpoints,
            announce_interval,
            discovered,
        })
    }

    /// Subscribe to peers heard on the group.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveredPeer> {
        self.discovered.subscribe()
    }

    /// Announce and listen until `shutdown` fires. The first
    /// announcement goes out immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut announce = interval(self.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = announce.tick() => {
                    if let Err(e) = self.announce().await {
                        debug!(error = %e, "multicast announce failed");
                    }
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((n, source)) => self.handle_datagram(&buf[..n], source).await,
                    Err(e) => warn!(error = %e, "discovery receive failed"),
                },
                _ = shutdown.changed() => {
                    debug!("discovery shutting down");
                    break;
                }
            }
        }
    }

    /// Multicast one PING announcement.
    pub async fn announce(&self) -> Result<(), KadError> {
        let request = Request::new(
            self.self_id,
            rand::random(),
            RequestBody::Ping(PingRequest {
                endpoints: self.local_endpoints.clone(),
            }),
        );
        let seq = MessageSequence::single(self.network, Message::Request(request));
        let frame = self.codec.encode(&seq)?;

        self.socket.send_to(&frame, self.group).await?;
        trace!(group = %self.group, "announced");
        Ok(())
    }

    async fn handle_datagram(&self, frame: &[u8], source: SocketAddr) {
        let inbound = classify_datagram(
            &*self.codec,
            self.network,
            &self.self_id,
            &self.local_endpoints,
            frame,
            source,
        );

        match inbound {
            Inbound::Announce { peer, reply } => {
                if let Ok(frame) = self.codec.encode(&reply) {
                    if let Err(e) = self.socket.send_to(&frame, source).await {
                        debug!(source = %source, error = %e, "discovery reply failed");
                    }
                }
                debug!(peer = %peer.id, source = %source, "heard announce");
                let _ = self.discovered.send(peer);
            }
            Inbound::Reply { peer } => {
                debug!(peer = %peer.id, source = %source, "announce answered");
                let _ = self.discovered.send(peer);
            }
            Inbound::Ignored => {}
        }
    }
}

enum Inbound {
    Announce {
        peer: DiscoveredPeer,
        reply: MessageSequence,
    },
    Reply {
        peer: DiscoveredPeer,
    },
    Ignored,
}

/// Decide what an inbound datagram means. Free of socket state so the
/// protocol rules are testable on their own.
fn classify_datagram(
    codec: &dyn Codec,
    network: u64,
    self_id: &NodeId,
    local_endpoints: &[String],
    frame: &[u8],
    source: SocketAddr,
) -> Inbound {
    let seq = match codec.decode(frame) {
        Ok(seq) => seq,
        Err(e) => {
            trace!(source = %source, error = %e, "undecodable discovery datagram");
            return Inbound::Ignored;
        }
    };

    if let Err(e) = seq.check_network(network) {
        trace!(source = %source, error = %e, "ignoring foreign announce");
        return Inbound::Ignored;
    }

    for message in seq.messages {
        match message {
            Message::Request(Request {
                header,
                body: RequestBody::Ping(ping),
            }) => {
                if header.sender == *self_id || ping.endpoints.is_empty() {
                    continue;
                }
                let reply = Response::success(
                    *self_id,
                    header.reply_id,
                    ResponseBody::Ping(PingResponse {
                        endpoints: local_endpoints.to_vec(),
                    }),
                );
                return Inbound::Announce {
                    peer: DiscoveredPeer {
                        id: header.sender,
                        endpoints: ping.endpoints,
                        source,
                    },
                    reply: MessageSequence::single(network, Message::Response(reply)),
                };
            }
            Message::Response(Response {
                header,
                body: ResponseBody::Ping(pong),
                ..
            }) => {
                if header.sender == *self_id || pong.endpoints.is_empty() {
                    continue;
                }
                return Inbound::Reply {
                    peer: DiscoveredPeer {
                        id: header.sender,
                        endpoints: pong.endpoints,
                        source,
                    },
                };
            }
            other => trace!(source = %source, "ignoring discovery message: {:?}", other),
        }
    }

    Inbound::Ignored
}
