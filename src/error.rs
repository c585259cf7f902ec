use thiserror::Error;

#[derive(Debug, Error)]
pub enum KadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("timeout")]
    Timeout,

    #[error("no endpoint of the peer could be reached")]
    EndpointNotAvailable,

    #[error("network id mismatch: ours {ours}, theirs {theirs}")]
    ProtocolMismatch { ours: u64, theirs: u64 },

    #[error("bucket index requested for our own id")]
    SelfReference,

    #[error("store version {offered} is older than current {current}")]
    StaleVersion { offered: u64, current: u64 },

    #[error("invalid endpoint uri: {0}")]
    InvalidEndpoint(String),

    #[error("invalid node id length")]
    InvalidNodeId,
}
