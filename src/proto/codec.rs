use bytes::Bytes;

use super::message::MessageSequence;
use crate::error::KadError;

/// On-wire encoding of [`MessageSequence`].
///
/// Implementations must round-trip every message type exactly; codec
/// choice is invisible above the transport.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, seq: &MessageSequence) -> Result<Bytes, KadError>;
    fn decode(&self, frame: &[u8]) -> Result<MessageSequence, KadError>;
}

/// JSON encoding via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, seq: &MessageSequence) -> Result<Bytes, KadError> {
        let data = serde_json::to_vec(seq).map_err(|e| KadError::Codec(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn decode(&self, frame: &[u8]) -> Result<MessageSequence, KadError> {
        serde_json::from_slice(frame).map_err(|e| KadError::Codec(e.to_string()))
    }
}

/// MessagePack encoding via rmp-serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, seq: &MessageSequence) -> Result<Bytes, KadError> {
        let data = rmp_serde::to_vec(seq).map_err(|e| KadError::Codec(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn decode(&self, frame: &[u8]) -> Result<MessageSequence, KadError> {
        rmp_serde::from_slice(frame).map_err(|e| KadError::Codec(e.to_string()))
    }
}
