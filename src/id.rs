//! Node identifiers and the XOR distance metric.
//!
//! Every node and every stored key lives in the same 160-bit
//! identifier space. Distance between two identifiers is their XOR,
//! read as an unsigned big-endian integer; the routing table is
//! indexed by the position of the highest set bit of that distance.

use std::fmt;

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::constants::{ID_BITS, ID_LEN};
use crate::error::KadError;

/// A 160-bit identifier for nodes and keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KadError> {
        if bytes.len() != ID_LEN {
            return Err(KadError::InvalidNodeId);
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance to `other`, big-endian.
    pub fn distance(&self, other: &NodeId) -> [u8; ID_LEN] {
        let mut dist = [0u8; ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }

    /// Routing bucket for `other` as seen from `self`.
    ///
    /// Bucket i holds peers whose distance falls in [2^i, 2^(i+1)),
    /// so bucket 0 is the closest shell and bucket 159 the farthest.
    /// Asking for our own bucket is a caller bug.
    pub fn bucket_index(&self, other: &NodeId) -> Result<usize, KadError> {
        let dist = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                let zeros = i * 8 + byte.leading_zeros() as usize;
                return Ok(ID_BITS - 1 - zeros);
            }
        }

        Err(KadError::SelfReference)
    }

    /// A random id that maps to `index` in our routing table.
    ///
    /// Used for bucket refresh: the returned id shares the first
    /// `ID_BITS - 1 - index` bits with `self`, differs at the next
    /// bit, and is random below it.
    pub fn random_in_bucket(&self, index: usize) -> NodeId {
        if index >= ID_BITS {
            return NodeId::generate();
        }

        let zeros = ID_BITS - 1 - index;
        let byte_idx = zeros / 8;
        let bit_idx = 7 - (zeros % 8);

        let mut id = self.0;
        id[byte_idx] ^= 1 << bit_idx;

        if bit_idx > 0 {
            let random_byte: u8 = rand::random();
            let keep_mask = !((1u8 << bit_idx) - 1);
            let random_mask = (1u8 << bit_idx) - 1;
            id[byte_idx] = (id[byte_idx] & keep_mask) | (random_byte & random_mask);
        }

        for b in id.iter_mut().skip(byte_idx + 1) {
            *b = rand::random();
        }

        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
