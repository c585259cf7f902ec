use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::correlation::CorrelationQueue;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::KadError;
use crate::id::NodeId;
use crate::proto::{Codec, Message, MessageSequence, PingRequest, Request, RequestBody, Response};
use crate::routing::{LivenessProbe, PeerEntry};
use crate::transport::MessageTransport;

/// Issues outbound RPCs for one node.
///
/// For a peer with several endpoints, tries them most-recently-
/// successful first; a timeout is reported to the registry (feeding
/// bucket eviction) and the next endpoint is tried within the same
/// call. Only when every endpoint has failed does the RPC surface
/// `EndpointNotAvailable`.
pub struct Invoker {
    transport: Arc<dyn MessageTransport>,
    correlation: Arc<CorrelationQueue>,
    registry: Arc<EndpointRegistry>,
    codec: Arc<dyn Codec>,
    self_id: NodeId,
    network: u64,
    request_timeout: Duration,
    local_endpoints: Vec<String>,
}

impl Invoker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        correlation: Arc<CorrelationQueue>,
        registry: Arc<EndpointRegistry>,
        codec: Arc<dyn Codec>,
        self_id: NodeId,
        network: u64,
        request_timeout: Duration,
        local_endpoints: Vec<String>,
    ) -> Self {
        Self {
            transport,
            correlation,
            registry,
            codec,
            self_id,
            network,
            request_timeout,
            local_endpoints,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// The endpoint URIs we advertise in PING bodies.
    pub fn local_endpoints(&self) -> &[String] {
        &self.local_endpoints
    }

    /// A PING request body carrying our endpoints.
    pub fn ping_body(&self) -> RequestBody {
        RequestBody::Ping(PingRequest {
            endpoints: self.local_endpoints.clone(),
        })
    }

    /// Send `body` to `peer`, walking its endpoints until one answers.
    pub async fn call(&self, peer: &PeerEntry, body: RequestBody) -> Result<Response, KadError> {
        let endpoints = peer.endpoints_by_preference();
        if endpoints.is_empty() {
            return Err(KadError::EndpointNotAvailable);
        }

        for endpoint in &endpoints {
            match self.call_endpoint(endpoint, body.clone()).await {
                Ok(response) => return Ok(response),
                Err(KadError::Timeout) | Err(KadError::Io(_)) => {
                    trace!(peer = %peer.id, endpoint = %endpoint, "endpoint failed, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(peer = %peer.id, tried = endpoints.len(), "all endpoints failed");
        Err(KadError::EndpointNotAvailable)
    }

    /// Send `body` to a single known endpoint.
    pub async fn call_endpoint(
        &self,
        endpoint: &Endpoint,
        body: RequestBody,
    ) -> Result<Response, KadError> {
        // Fresh ids until one is vacant; the correlation key must be
        // unique among our requests to this endpoint.
        let mut reply_id = rand::random::<u32>();
        let pending = loop {
            match self.correlation.register(endpoint, reply_id) {
                Some(pending) => break pending,
                None => reply_id = rand::random(),
            }
        };

        let request = Request::new(self.self_id, reply_id, body);
        let seq = MessageSequence::single(self.network, Message::Request(request));
        let frame = self.codec.encode(&seq)?;

        self.transport.send(endpoint, frame).await?;

        match pending.wait(self.request_timeout).await {
            Ok(response) => {
                self.registry.on_success(endpoint);
                Ok(response)
            }
            Err(KadError::Timeout) => {
                self.registry.on_timeout(endpoint);
                debug!(endpoint = %endpoint, reply_id, "request timed out");
                Err(KadError::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LivenessProbe for Invoker {
    async fn ping(&self, peer: &PeerEntry) -> bool {
        self.call(peer, self.ping_body()).await.is_ok()
    }
}
