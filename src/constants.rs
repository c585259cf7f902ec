//! Protocol constants and tuning parameters.
//!
//! Defaults follow the classic Kademlia paper values (k = 20, α = 3,
//! hourly refresh/republish) with a 5 second RPC deadline. Everything
//! here can be overridden per instance through [`crate::KadConfig`].

use std::net::Ipv4Addr;
use std::time::Duration;

// ============================================================================
// Identifier space
// ============================================================================

/// Node id width in bytes (160-bit identifier space).
pub const ID_LEN: usize = 20;

/// Node id width in bits; also the number of routing buckets.
pub const ID_BITS: usize = ID_LEN * 8;

// ============================================================================
// Routing
// ============================================================================

/// Bucket capacity (k).
pub const DEFAULT_K: usize = 20;

/// Lookup concurrency (α).
pub const DEFAULT_ALPHA: usize = 3;

/// Buckets untouched for this long are refreshed with a random lookup.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// RPC
// ============================================================================

/// Per-RPC response deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Datagram receive buffer; large enough for a full UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// ============================================================================
// Value store
// ============================================================================

/// Primary entries are re-stored on the network at this cadence.
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Primary entries freshen their replicas at this cadence.
pub const DEFAULT_REPLICATE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How often expired entries are swept out of the store.
pub const DEFAULT_EXPIRE_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Multicast discovery
// ============================================================================

/// Default IPv4 multicast group for LAN bootstrap.
pub const DISCOVERY_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 83, 84);

/// Default multicast port.
pub const DISCOVERY_PORT: u16 = 5354;

/// Cadence of multicast PING announcements.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Capacity of the discovered-peer broadcast channel.
pub const DISCOVERY_CHANNEL_CAPACITY: usize = 64;
