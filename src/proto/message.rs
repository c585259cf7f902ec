use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::KadError;
use crate::id::NodeId;
use crate::store::StoreMode;

/// Top-level envelope for one datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSequence {
    /// Scoping token; receivers drop sequences from other networks.
    pub network: u64,
    pub messages: Vec<Message>,
}

impl MessageSequence {
    pub fn single(network: u64, message: Message) -> Self {
        Self {
            network,
            messages: vec![message],
        }
    }

    /// Verify this sequence belongs to our network.
    ///
    /// Receivers drop mismatching sequences without a reply; the
    /// returned error exists to be logged at the drop site.
    pub fn check_network(&self, ours: u64) -> Result<(), KadError> {
        if self.network != ours {
            return Err(KadError::ProtocolMismatch {
                ours,
                theirs: self.network,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Common preamble of every request and response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Header {
    pub sender: NodeId,
    /// Sender-chosen token echoed by the responder. Unique only per
    /// sender, so correlation is by (endpoint, reply id).
    pub reply_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub header: Header,
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    Ping(PingRequest),
    Store(StoreRequest),
    FindNode(FindNodeRequest),
    FindValue(FindValueRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub header: Header,
    pub status: ResponseStatus,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Ping(PingResponse),
    Store(StoreResponse),
    FindNode(FindNodeResponse),
    FindValue(FindValueResponse),
}

/// PING carries the sender's reachable endpoint URIs both ways.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub endpoints: Vec<String>,
}

/// A value together with its version and remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub data: Bytes,
    pub version: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub key: NodeId,
    pub mode: StoreMode,
    pub value: Option<ValueInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    Invalid,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: StoreStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeRequest {
    pub key: NodeId,
}

/// A peer as carried on the wire: id plus endpoint URIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeResponse {
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueRequest {
    pub key: NodeId,
}

/// Either the value, or the closest nodes the responder knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueResponse {
    pub nodes: Vec<NodeInfo>,
    pub value: Option<ValueInfo>,
}

impl Request {
    pub fn new(sender: NodeId, reply_id: u32, body: RequestBody) -> Self {
        Self {
            header: Header { sender, reply_id },
            body,
        }
    }
}

impl Response {
    /// A successful reply echoing the request's reply id.
    pub fn success(sender: NodeId, reply_id: u32, body: ResponseBody) -> Self {
        Self {
            header: Header { sender, reply_id },
            status: ResponseStatus::Success,
            body,
        }
    }

    /// A reply for a request the responder could not service, such as
    /// a STORE that carries no value. Application-level rejections
    /// (a stale version, say) keep a Success envelope and speak
    /// through the body instead.
    pub fn failure(sender: NodeId, reply_id: u32, body: ResponseBody) -> Self {
        Self {
            header: Header { sender, reply_id },
            status: ResponseStatus::Failure,
            body,
        }
    }
}
