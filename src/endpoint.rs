//! Canonical transport endpoints and their liveness telemetry.
//!
//! The registry interns one handle per logical transport address so
//! that equality and hashing identify a peer's address consistently,
//! no matter how its URI was spelled. Handles are reference counted;
//! an address drops out of the registry once no peer entry holds it.
//!
//! The registry records outcomes (`on_success` / `on_timeout`) on the
//! handle itself and fans them out to subscribers; it makes no policy
//! decisions of its own.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::KadError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A canonical handle for one reachable transport address.
///
/// Cheap to clone; equality and hash are structural over the
/// canonical URI.
#[derive(Clone)]
pub struct Endpoint(Arc<EndpointInner>);

struct EndpointInner {
    uri: String,
    addr: SocketAddr,
    last_success: RwLock<Option<Instant>>,
    timeouts: AtomicU32,
}

impl Endpoint {
    /// Canonical `udp://ip:port` form.
    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    pub fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    /// When this endpoint last answered a request, if ever.
    pub fn last_success(&self) -> Option<Instant> {
        *self.0.last_success.read()
    }

    /// Number of timeouts observed against this endpoint.
    pub fn timeouts(&self) -> u32 {
        self.0.timeouts.load(Ordering::Relaxed)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.uri == other.0.uri
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.uri.hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0.uri)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.uri)
    }
}

/// Success or timeout observed against an endpoint.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Success(Endpoint),
    Timeout(Endpoint),
}

/// Interning table for [`Endpoint`] handles.
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<String, Weak<EndpointInner>>>,
    events: broadcast::Sender<EndpointEvent>,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            endpoints: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Canonicalize `uri` and return the shared handle for it.
    ///
    /// Accepts `udp://ip:port` or a bare `ip:port`; hostnames are not
    /// resolved here, callers do DNS before handing addresses in.
    pub fn resolve(&self, uri: &str) -> Result<Endpoint, KadError> {
        let addr = parse_uri(uri)?;
        Ok(self.intern(addr))
    }

    /// Handle for the source address of an inbound datagram.
    pub fn from_addr(&self, addr: SocketAddr) -> Endpoint {
        self.intern(addr)
    }

    fn intern(&self, addr: SocketAddr) -> Endpoint {
        let uri = format!("udp://{}", addr);

        if let Some(existing) = self.endpoints.read().get(&uri).and_then(Weak::upgrade) {
            return Endpoint(existing);
        }

        let mut endpoints = self.endpoints.write();
        // Racing resolvers may have interned it between the locks.
        if let Some(existing) = endpoints.get(&uri).and_then(Weak::upgrade) {
            return Endpoint(existing);
        }

        let inner = Arc::new(EndpointInner {
            uri: uri.clone(),
            addr,
            last_success: RwLock::new(None),
            timeouts: AtomicU32::new(0),
        });
        endpoints.insert(uri, Arc::downgrade(&inner));
        Endpoint(inner)
    }

    /// Record a successful exchange over `endpoint`.
    pub fn on_success(&self, endpoint: &Endpoint) {
        *endpoint.0.last_success.write() = Some(Instant::now());
        let _ = self.events.send(EndpointEvent::Success(endpoint.clone()));
    }

    /// Record a timed-out exchange over `endpoint`.
    pub fn on_timeout(&self, endpoint: &Endpoint) {
        endpoint.0.timeouts.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(EndpointEvent::Timeout(endpoint.clone()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    /// Drop table slots whose endpoints are no longer referenced.
    pub fn prune(&self) -> usize {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|_, weak| weak.strong_count() > 0);
        before - endpoints.len()
    }

    /// Number of live interned endpoints.
    pub fn len(&self) -> usize {
        self.endpoints
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_uri(uri: &str) -> Result<SocketAddr, KadError> {
    let trimmed = uri.trim();
    let rest = match trimmed.find("://") {
        Some(idx) => {
            let (scheme, rest) = trimmed.split_at(idx);
            if !scheme.eq_ignore_ascii_case("udp") {
                return Err(KadError::InvalidEndpoint(uri.to_string()));
            }
            &rest[3..]
        }
        None => trimmed,
    };

    rest.parse()
        .map_err(|_| KadError::InvalidEndpoint(uri.to_string()))
}
