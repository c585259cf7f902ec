//! rkad - a Kademlia distributed hash table
//!
//! This library implements a Kademlia DHT node over UDP: a
//! self-organizing peer-to-peer overlay that stores and retrieves
//! binary values keyed by 160-bit identifiers, with lookups costing
//! O(log n) hops in the size of the network.
//!
//! # Overview
//!
//! Nodes and keys share one identifier space; distance between two
//! identifiers is their XOR. Each node keeps a routing table of
//! k-buckets biased toward long-lived peers and locates keys by
//! iteratively querying the α closest known peers until no closer
//! ones turn up.
//!
//! # Getting Started
//!
//! ```no_run
//! use rkad::{KadConfig, KadServer, NodeId};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Bind a node and drive it.
//! let node = KadServer::bind("0.0.0.0:4000".parse()?, KadConfig::default()).await?;
//! tokio::spawn(node.clone().run());
//!
//! // Join an overlay through any known member.
//! node.connect("udp://198.51.100.7:4000").await?;
//!
//! // Store and fetch values.
//! let key = NodeId::generate();
//! node.put(key, "hello".into(), Duration::from_secs(3600)).await?;
//! if let Some(value) = node.get(&key).await {
//!     println!("found {:?}", value.data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`id`] - identifiers and the XOR metric
//! - [`endpoint`] - canonical transport addresses with telemetry
//! - [`routing`] - k-buckets and the routing table
//! - [`store`] - versioned value store with TTL and republication
//! - [`proto`] - wire envelope and pluggable codecs
//! - [`rpc`] - request/response correlation and outbound calls
//! - [`lookup`] - the iterative α-parallel lookup engine
//! - [`server`] - the node: request handling and maintenance
//! - [`discovery`] - LAN bootstrap over UDP multicast

pub mod config;
pub mod constants;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod lookup;
pub mod proto;
pub mod routing;
pub mod rpc;
pub mod server;
pub mod store;
pub mod transport;

pub use config::KadConfig;
pub use discovery::{DiscoveredPeer, Discovery};
pub use endpoint::{Endpoint, EndpointEvent, EndpointRegistry};
pub use error::KadError;
pub use id::NodeId;
pub use lookup::{FindValueResult, LookupEngine};
pub use proto::{Codec, JsonCodec, MsgpackCodec, ValueInfo};
pub use routing::{LivenessProbe, PeerEntry, RoutingTable, TouchOutcome};
pub use rpc::{CorrelationQueue, Invoker};
pub use server::KadServer;
pub use store::{StoreMode, ValueStore};
pub use transport::{MessageTransport, UdpTransport};
