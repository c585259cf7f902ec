//! Message transport seam.
//!
//! The node core only needs framed datagrams with a preserved
//! endpoint identity: what goes out to an [`Endpoint`] and what came
//! in from one. UDP is the primary transport; the reply's source
//! address is taken as the responding endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::KadError;

#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// The local address peers can reach us at.
    fn local_addr(&self) -> SocketAddr;

    async fn send(&self, target: &Endpoint, frame: Bytes) -> Result<(), KadError>;

    /// Next inbound frame together with its source endpoint.
    async fn recv(&self) -> Result<(Bytes, Endpoint), KadError>;
}

/// Datagram transport over one UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
    registry: Arc<EndpointRegistry>,
    local_addr: SocketAddr,
    recv_buf: Mutex<Vec<u8>>,
}

impl UdpTransport {
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<EndpointRegistry>,
    ) -> Result<Self, KadError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            registry,
            local_addr,
            recv_buf: Mutex::new(vec![0u8; MAX_DATAGRAM_SIZE]),
        })
    }
}

#[async_trait]
impl MessageTransport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, target: &Endpoint, frame: Bytes) -> Result<(), KadError> {
        self.socket.send_to(&frame, target.addr()).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Bytes, Endpoint), KadError> {
        let mut buf = self.recv_buf.lock().await;
        let (n, addr) = self.socket.recv_from(&mut buf).await?;
        Ok((
            Bytes::copy_from_slice(&buf[..n]),
            self.registry.from_addr(addr),
        ))
    }
}
