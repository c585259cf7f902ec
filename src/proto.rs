//! Wire protocol: message envelope and pluggable codecs.
//!
//! Every datagram carries one [`MessageSequence`], scoped to a network
//! id so unrelated overlays can share a transport or multicast group.
//! Requests and responses are correlated by the sender-chosen 32-bit
//! reply id in their [`Header`].
//!
//! Encoding is a seam: any [`Codec`] that round-trips the envelope is
//! interchangeable, and the choice has no effect on semantics. Two
//! codecs ship with the crate:
//!
//! - [`JsonCodec`] - self-describing, handy for debugging
//! - [`MsgpackCodec`] - compact binary, the default
//!
//! # Examples
//!
//! ```
//! use rkad::proto::{Codec, JsonCodec, MessageSequence, MsgpackCodec};
//!
//! let seq = MessageSequence { network: 7, messages: Vec::new() };
//! let json = JsonCodec.encode(&seq).unwrap();
//! let mp = MsgpackCodec.encode(&seq).unwrap();
//! assert_eq!(JsonCodec.decode(&json).unwrap().network, 7);
//! assert_eq!(MsgpackCodec.decode(&mp).unwrap().network, 7);
//! ```

mod codec;
mod message;

pub use codec::{Codec, JsonCodec, MsgpackCodec};
pub use message::{
    FindNodeRequest, FindNodeResponse, FindValueRequest, FindValueResponse, Header, Message,
    MessageSequence, NodeInfo, PingRequest, PingResponse, Request, RequestBody, Response,
    ResponseBody, ResponseStatus, StoreRequest, StoreResponse, StoreStatus, ValueInfo,
};
