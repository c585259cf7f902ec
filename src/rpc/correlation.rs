use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

use crate::endpoint::Endpoint;
use crate::error::KadError;
use crate::proto::Response;

/// Outstanding requests awaiting their replies.
///
/// Keyed by (endpoint, reply id): reply ids are chosen by us per
/// request, so they are only unique per destination and the endpoint
/// must be part of the key. At most one waiter per key exists at a
/// time; registration fails while a key is taken.
pub struct CorrelationQueue {
    pending: RwLock<HashMap<(Endpoint, u32), mpsc::Sender<Response>>>,
}

impl Default for CorrelationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Register a waiter for `(endpoint, reply_id)`.
    ///
    /// Must happen before the request datagram goes out, so a fast
    /// reply always finds its waiter. Returns `None` while another
    /// request is outstanding under the same key.
    pub fn register(&self, endpoint: &Endpoint, reply_id: u32) -> Option<PendingReply<'_>> {
        let key = (endpoint.clone(), reply_id);
        let (tx, rx) = mpsc::channel(1);

        let mut pending = self.pending.write();
        if pending.contains_key(&key) {
            return None;
        }
        pending.insert(key.clone(), tx);

        Some(PendingReply {
            queue: self,
            key,
            rx,
        })
    }

    /// Deliver `response` to the waiter for `(endpoint, reply_id)`.
    ///
    /// Returns false when no waiter exists (late or unknown reply);
    /// such replies are dropped.
    pub fn respond(&self, endpoint: &Endpoint, reply_id: u32, response: Response) -> bool {
        let pending = self.pending.read();
        match pending.get(&(endpoint.clone(), reply_id)) {
            Some(tx) => tx.try_send(response).is_ok(),
            None => {
                trace!(endpoint = %endpoint, reply_id, "dropping reply with no waiter");
                false
            }
        }
    }

    /// Number of requests currently awaiting replies.
    pub fn outstanding(&self) -> usize {
        self.pending.read().len()
    }

    fn unregister(&self, key: &(Endpoint, u32)) {
        self.pending.write().remove(key);
    }
}

/// A registered waiter. Dropping it (cancellation, timeout, or a
/// delivered reply) removes the correlation entry.
pub struct PendingReply<'a> {
    queue: &'a CorrelationQueue,
    key: (Endpoint, u32),
    rx: mpsc::Receiver<Response>,
}

impl PendingReply<'_> {
    /// Await the reply for up to `deadline`.
    pub async fn wait(mut self, deadline: Duration) -> Result<Response, KadError> {
        match timeout(deadline, self.rx.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(KadError::Timeout),
            Err(_) => Err(KadError::Timeout),
        }
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.queue.unregister(&self.key);
    }
}
