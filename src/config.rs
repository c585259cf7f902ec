//! Per-instance configuration.
//!
//! All tuning lives here so that two nodes in one process never share
//! mutable state; [`crate::constants`] only supplies the defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ALPHA, DEFAULT_DISCOVERY_INTERVAL, DEFAULT_EXPIRE_INTERVAL, DEFAULT_K,
    DEFAULT_REFRESH_INTERVAL, DEFAULT_REPLICATE_INTERVAL, DEFAULT_REPUBLISH_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};

#[derive(Debug, Clone)]
pub struct KadConfig {
    /// Bucket capacity (k).
    pub k: usize,

    /// Lookup concurrency (α).
    pub alpha: usize,

    /// Per-RPC response deadline.
    pub request_timeout: Duration,

    /// Buckets untouched for this long get a refresh lookup.
    pub refresh_interval: Duration,

    /// Cadence at which primary values are re-stored on the network.
    pub republish_interval: Duration,

    /// Cadence at which primary values freshen their replicas.
    pub replicate_interval: Duration,

    /// Cadence of the local expiry sweep.
    pub expire_interval: Duration,

    /// Scoping token; messages from other networks are dropped.
    pub network_id: u64,

    /// Multicast group for LAN discovery, if enabled.
    pub multicast_group: Option<SocketAddr>,

    /// Cadence of multicast announcements.
    pub discovery_interval: Duration,
}

impl Default for KadConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
            replicate_interval: DEFAULT_REPLICATE_INTERVAL,
            expire_interval: DEFAULT_EXPIRE_INTERVAL,
            network_id: 0,
            multicast_group: None,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }
}

impl KadConfig {
    /// A configuration scoped to `network_id` with everything else at
    /// the defaults.
    pub fn for_network(network_id: u64) -> Self {
        Self {
            network_id,
            ..Self::default()
        }
    }
}
