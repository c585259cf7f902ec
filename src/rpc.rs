//! Request/response plumbing over an unreliable transport.
//!
//! [`CorrelationQueue`] matches asynchronous replies to outstanding
//! requests by (endpoint, reply id); [`Invoker`] issues outbound RPCs,
//! walking a peer's endpoints from most-recently-successful to least
//! until one answers.

mod correlation;
mod invoker;

pub use correlation::{CorrelationQueue, PendingReply};
pub use invoker::Invoker;
