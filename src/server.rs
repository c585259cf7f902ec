//! The node itself: inbound request handling, the receive loop, and
//! periodic maintenance.
//!
//! # Examples
//!
//! ```no_run
//! use rkad::{KadConfig, KadServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = KadServer::bind("0.0.0.0:4000".parse()?, KadConfig::default()).await?;
//!
//! tokio::spawn(node.clone().run());
//!
//! // Join an existing overlay through any known member.
//! node.connect("udp://198.51.100.7:4000").await?;
//!
//! let key = rkad::NodeId::generate();
//! node.put(key, "hello".into(), std::time::Duration::from_secs(60)).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::KadConfig;
use crate::constants::{DISCOVERY_MULTICAST_V4, DISCOVERY_PORT};
use crate::discovery::{DiscoveredPeer, Discovery};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::KadError;
use crate::id::NodeId;
use crate::lookup::{FindValueResult, LookupEngine};
use crate::proto::{
    Codec, FindNodeResponse, FindValueResponse, Message, MessageSequence, MsgpackCodec, NodeInfo,
    PingResponse, Request, RequestBody, Response, ResponseBody, ResponseStatus, StoreRequest,
    StoreResponse, StoreStatus, ValueInfo,
};
use crate::routing::{LivenessProbe, PeerEntry, RoutingTable};
use crate::rpc::{CorrelationQueue, Invoker};
use crate::store::{StoreMode, ValueStore};
use crate::transport::{MessageTransport, UdpTransport};

/// One DHT node bound to a transport.
pub struct KadServer {
    config: KadConfig,
    id: NodeId,
    codec: Arc<dyn Codec>,
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn MessageTransport>,
    correlation: Arc<CorrelationQueue>,
    invoker: Arc<Invoker>,
    router: Arc<RoutingTable>,
    store: Arc<ValueStore>,
    lookup: LookupEngine,
    shutdown: watch::Sender<bool>,
}

impl KadServer {
    /// Bind a UDP socket and assemble a node with a fresh random id
    /// and the MessagePack codec.
    pub async fn bind(addr: SocketAddr, config: KadConfig) -> Result<Arc<Self>, KadError> {
        Self::bind_with(addr, config, NodeId::generate(), Arc::new(MsgpackCodec)).await
    }

    /// Bind with an explicit id and codec.
    pub async fn bind_with(
        addr: SocketAddr,
        config: KadConfig,
        id: NodeId,
        codec: Arc<dyn Codec>,
    ) -> Result<Arc<Self>, KadError> {
        let registry = Arc::new(EndpointRegistry::new());
        let transport: Arc<dyn MessageTransport> =
            Arc::new(UdpTransport::bind(addr, Arc::clone(&registry)).await?);
        Ok(Self::assemble(config, id, codec, registry, transport))
    }

    /// Assemble a node over any transport. Used directly by tests and
    /// alternative transports.
    pub fn assemble(
        config: KadConfig,
        id: NodeId,
        codec: Arc<dyn Codec>,
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn MessageTransport>,
    ) -> Arc<Self> {
        let local_addr = transport.local_addr();
        let correlation = Arc::new(CorrelationQueue::new());
        let invoker = Arc::new(Invoker::new(
            Arc::clone(&transport),
            Arc::clone(&correlation),
            Arc::clone(&registry),
            Arc::clone(&codec),
            id,
            config.network_id,
            config.request_timeout,
            vec![format!("udp://{}", local_addr)],
        ));
        let probe: Arc<dyn LivenessProbe> = invoker.clone() as Arc<dyn LivenessProbe>;
        let router = Arc::new(RoutingTable::new(id, config.k, probe));
        let store = Arc::new(ValueStore::new(
            config.republish_interval,
            config.replicate_interval,
        ));
        let lookup = LookupEngine::new(
            Arc::clone(&router),
            Arc::clone(&invoker),
            Arc::clone(&registry),
            config.k,
            config.alpha,
        );
        let (shutdown, _) = watch::channel(false);

        info!(id = %id, addr = %local_addr, network = config.network_id, "node assembled");

        Arc::new(Self {
            config,
            id,
            codec,
            registry,
            transport,
            correlation,
            invoker,
            router,
            store,
            lookup,
            shutdown,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &KadConfig {
        &self.config
    }

    pub fn router(&self) -> &RoutingTable {
        &self.router
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Number of requests currently awaiting replies.
    pub fn outstanding_requests(&self) -> usize {
        self.correlation.outstanding()
    }

    /// Drive the node: receive loop plus maintenance timers. Runs
    /// until [`KadServer::shutdown`] is called.
    pub async fn run(self: Arc<Self>) {
        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        let mut maintenance = tokio::time::interval(self.config.expire_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);
        refresh.tick().await;
        maintenance.tick().await;

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                result = self.transport.recv() => match result {
                    Ok((frame, source)) => {
                        // Handling can block on a bucket probe, so it
                        // must not stall the receive loop.
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_frame(frame, source).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "receive failed"),
                },
                _ = refresh.tick() => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.refresh_buckets().await; });
                }
                _ = maintenance.tick() => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.run_maintenance().await; });
                }
                _ = shutdown.changed() => {
                    debug!(id = %self.id, "node shutting down");
                    break;
                }
            }
        }
    }

    /// Signal the run loop (and any discovery loop) to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Start multicast discovery on the configured group (or the
    /// default one) and connect to every peer heard there.
    ///
    /// Returns the stream of discovered peers for observation; the
    /// connecting happens on its own task either way. Both loops stop
    /// with [`KadServer::shutdown`].
    pub async fn start_discovery(
        self: Arc<Self>,
    ) -> Result<tokio::sync::broadcast::Receiver<DiscoveredPeer>, KadError> {
        let group = self
            .config
            .multicast_group
            .unwrap_or_else(|| SocketAddr::from((DISCOVERY_MULTICAST_V4, DISCOVERY_PORT)));

        let discovery = Arc::new(
            Discovery::bind(
                group,
                Arc::clone(&self.codec),
                self.config.network_id,
                self.id,
                self.invoker.local_endpoints().to_vec(),
                self.config.discovery_interval,
            )
            .await?,
        );

        let observer = discovery.subscribe();
        let mut heard = discovery.subscribe();
        tokio::spawn(Arc::clone(&discovery).run(self.shutdown_signal()));

        let server = Arc::clone(&self);
        tokio::spawn(async move {
            while let Ok(peer) = heard.recv().await {
                for uri in &peer.endpoints {
                    match server.connect(uri).await {
                        Ok(()) => break,
                        Err(e) => debug!(peer = %peer.id, uri = %uri, error = %e, "connect to discovered peer failed"),
                    }
                }
            }
        });

        Ok(observer)
    }

    // ------------------------------------------------------------------
    // Client API
    // ------------------------------------------------------------------

    /// PING a known address, learning the peer behind it.
    pub async fn ping(&self, uri: &str) -> Result<PingResponse, KadError> {
        let endpoint = self.registry.resolve(uri)?;
        let response = self
            .invoker
            .call_endpoint(&endpoint, self.invoker.ping_body())
            .await?;

        let sender = response.header.sender;
        match response.body {
            ResponseBody::Ping(pong) => {
                self.update_router_with_uris(sender, &endpoint, &pong.endpoints)
                    .await;
                Ok(pong)
            }
            other => {
                debug!(endpoint = %endpoint, "unexpected reply body: {:?}", other);
                Err(KadError::Codec("unexpected reply body".to_string()))
            }
        }
    }

    /// Join the overlay through `uri`: PING it, then walk toward our
    /// own id to populate nearby buckets.
    pub async fn connect(&self, uri: &str) -> Result<(), KadError> {
        self.ping(uri).await?;
        let found = self.lookup.find_node(self.id).await;
        info!(via = uri, peers = found.len(), "connected");
        Ok(())
    }

    /// Iterative node lookup.
    pub async fn find_node(&self, target: NodeId) -> Vec<PeerEntry> {
        self.lookup.find_node(target).await
    }

    /// Store a value under `key` as its originator.
    ///
    /// The value lands in the local store (primary, so it republishes
    /// on schedule) and on the k closest peers. Returns how many
    /// remote replicas acknowledged; 0 means we only hold it locally.
    pub async fn put(&self, key: NodeId, data: Bytes, ttl: Duration) -> Result<usize, KadError> {
        let value = ValueInfo {
            data,
            version: self.store.next_version(&key),
            ttl,
        };
        self.store.set(key, StoreMode::Primary, value.clone())?;

        match self.lookup.store(key, value, StoreMode::Replica).await {
            Ok(acks) => Ok(acks),
            Err(KadError::EndpointNotAvailable) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Fetch the value under `key`, locally or via iterative lookup.
    ///
    /// A value found remotely is also cached at the closest answering
    /// peer that did not hold it, shortening the next lookup's path.
    pub async fn get(&self, key: &NodeId) -> Option<ValueInfo> {
        if let Some(value) = self.store.get(key) {
            return Some(value);
        }

        match self.lookup.find_value(*key).await {
            FindValueResult::Found {
                value,
                cache_target,
            } => {
                if let Some(peer) = cache_target {
                    let invoker = Arc::clone(&self.invoker);
                    let request = RequestBody::Store(StoreRequest {
                        key: *key,
                        mode: StoreMode::Replica,
                        value: Some(value.clone()),
                    });
                    tokio::spawn(async move {
                        if let Err(e) = invoker.call(&peer, request).await {
                            debug!(peer = %peer.id, error = %e, "cache-on-return store failed");
                        }
                    });
                }
                Some(value)
            }
            FindValueResult::NotFound(_) => None,
        }
    }

    // ------------------------------------------------------------------
    // Inbound handling
    // ------------------------------------------------------------------

    async fn handle_frame(&self, frame: Bytes, source: Endpoint) {
        let seq = match self.codec.decode(&frame) {
            Ok(seq) => seq,
            Err(e) => {
                debug!(source = %source, error = %e, "dropping undecodable frame");
                return;
            }
        };

        if let Err(e) = seq.check_network(self.config.network_id) {
            debug!(source = %source, error = %e, "dropping message");
            return;
        }

        for message in seq.messages {
            match message {
                Message::Response(response) => self.handle_response(&source, response).await,
                Message::Request(request) => {
                    if let Err(e) = self.handle_request(&source, request).await {
                        debug!(source = %source, error = %e, "request handling failed");
                    }
                }
            }
        }
    }

    async fn handle_response(&self, source: &Endpoint, response: Response) {
        let sender = response.header.sender;
        let reply_id = response.header.reply_id;

        // Deliver before touching the router: a bucket probe may be
        // holding the sender's bucket while it waits for this reply.
        self.correlation.respond(source, reply_id, response);
        self.router
            .update(sender, std::slice::from_ref(source))
            .await;
    }

    /// Service one inbound request. Every request first feeds the
    /// routing table; contact is how the overlay learns its shape.
    async fn handle_request(&self, source: &Endpoint, request: Request) -> Result<(), KadError> {
        let sender = request.header.sender;
        let reply_id = request.header.reply_id;
        trace!(source = %source, sender = %sender, reply_id, "inbound request");

        let mut status = ResponseStatus::Success;
        let body = match request.body {
            RequestBody::Ping(ping) => {
                self.update_router_with_uris(sender, source, &ping.endpoints)
                    .await;
                ResponseBody::Ping(PingResponse {
                    endpoints: self.invoker.local_endpoints().to_vec(),
                })
            }
            RequestBody::Store(store) => {
                self.router
                    .update(sender, std::slice::from_ref(source))
                    .await;

                let store_status = match store.value {
                    Some(value) => match self.store.set(store.key, store.mode, value) {
                        Ok(()) => StoreStatus::Success,
                        Err(KadError::StaleVersion { offered, current }) => {
                            debug!(key = %store.key, offered, current, "rejecting stale store");
                            StoreStatus::Invalid
                        }
                        Err(e) => return Err(e),
                    },
                    None => {
                        // A STORE with nothing to store is malformed,
                        // not merely stale.
                        debug!(key = %store.key, sender = %sender, "store request without a value");
                        status = ResponseStatus::Failure;
                        StoreStatus::Invalid
                    }
                };
                ResponseBody::Store(StoreResponse {
                    status: store_status,
                })
            }
            RequestBody::FindNode(find) => {
                self.router
                    .update(sender, std::slice::from_ref(source))
                    .await;
                ResponseBody::FindNode(FindNodeResponse {
                    nodes: self.select_nodes(&find.key).await,
                })
            }
            RequestBody::FindValue(find) => {
                self.router
                    .update(sender, std::slice::from_ref(source))
                    .await;

                match self.store.get(&find.key) {
                    Some(value) => ResponseBody::FindValue(FindValueResponse {
                        nodes: Vec::new(),
                        value: Some(value),
                    }),
                    None => ResponseBody::FindValue(FindValueResponse {
                        nodes: self.select_nodes(&find.key).await,
                        value: None,
                    }),
                }
            }
        };

        let response = match status {
            ResponseStatus::Success => Response::success(self.id, reply_id, body),
            ResponseStatus::Failure => Response::failure(self.id, reply_id, body),
        };
        let seq = MessageSequence::single(self.config.network_id, Message::Response(response));
        let frame = self.codec.encode(&seq)?;
        self.transport.send(source, frame).await
    }

    /// The k closest known peers to `key`, counting ourselves as a
    /// known peer.
    async fn select_nodes(&self, key: &NodeId) -> Vec<NodeInfo> {
        let mut candidates: Vec<(NodeId, Vec<String>)> = self
            .router
            .select(key, self.config.k)
            .await
            .into_iter()
            .map(|peer| {
                let uris = peer.endpoints().iter().map(|e| e.uri().to_string()).collect();
                (peer.id, uris)
            })
            .collect();
        candidates.push((self.id, self.invoker.local_endpoints().to_vec()));

        candidates.sort_by(|(a, _), (b, _)| {
            a.distance(key)
                .cmp(&b.distance(key))
                .then_with(|| a.cmp(b))
        });
        candidates.truncate(self.config.k);

        candidates
            .into_iter()
            .map(|(id, endpoints)| NodeInfo { id, endpoints })
            .collect()
    }

    /// Learn `sender` at the inbound source plus whatever endpoints
    /// it claims for itself.
    pub(crate) async fn update_router_with_uris(
        &self,
        sender: NodeId,
        source: &Endpoint,
        claimed: &[String],
    ) {
        let mut endpoints = vec![source.clone()];
        for uri in claimed {
            match self.registry.resolve(uri) {
                Ok(ep) => {
                    if !endpoints.contains(&ep) {
                        endpoints.push(ep);
                    }
                }
                Err(_) => trace!(sender = %sender, uri = %uri, "ignoring unparseable endpoint"),
            }
        }
        self.router.update(sender, &endpoints).await;
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    async fn refresh_buckets(&self) {
        if self.router.is_empty().await {
            return;
        }

        let stale = self.router.stale_buckets(self.config.refresh_interval);
        if stale.is_empty() {
            return;
        }
        debug!(count = stale.len(), "refreshing stale buckets");

        for index in stale {
            let target = self.id.random_in_bucket(index);
            let _ = self.lookup.find_node(target).await;
        }
    }

    async fn run_maintenance(&self) {
        let expired = self.store.expire();
        if expired > 0 {
            debug!(expired, "dropped expired values");
        }
        self.registry.prune();

        for (key, value) in self.store.due_for_republish() {
            if let Err(e) = self.lookup.store(key, value, StoreMode::Primary).await {
                debug!(key = %key, error = %e, "republish failed");
            }
        }

        for (key, value) in self.store.due_for_replicate() {
            if let Err(e) = self.lookup.store(key, value, StoreMode::Replica).await {
                debug!(key = %key, error = %e, "replicate failed");
            }
        }
    }
}
