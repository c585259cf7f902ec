//! Routing table: 160 k-buckets of peers keyed by XOR distance.
//!
//! Each bucket is an LRU list of up to k peers, least-recently-seen
//! first. A full bucket never takes a newcomer on faith: the oldest
//! peer is probed with a PING, keeps its seat if it answers, and only
//! a dead head is evicted. Long-lived peers are the most likely to
//! stay alive, so the table is biased toward them.

mod bucket;
mod table;

pub use bucket::{Bucket, LivenessProbe, PeerEntry, TouchOutcome};
pub use table::RoutingTable;

#[cfg(test)]
mod tests;
