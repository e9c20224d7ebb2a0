//! Relay transport.
//!
//! The relay is an untrusted, lossy pair of FIFO queues per channel. This
//! module moves opaque base64 bodies in and out of those queues and does no
//! interpretation of its own: a send worker drains outbound envelopes and a
//! receive poller long-polls the inbound queue, filters replays and hands the
//! decoded envelopes on.

mod dedup;
mod http;
mod memory;
mod retry;
mod worker;

use async_trait::async_trait;
use uuid::Uuid;

pub use dedup::RecentMessages;
pub use http::HttpRelay;
pub use memory::MemoryRelay;
pub use retry::RetryPolicy;
pub use worker::{Outbound, SendResult, spawn_poller, spawn_sender};

/// Errors surfaced by a relay backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Network failure or relay-side hiccup; worth retrying.
    #[error("Relay unavailable: {0}")]
    Transient(String),

    /// The relay refused the request and will keep refusing it.
    #[error("Relay rejected request: {0}")]
    Fatal(String),
}

impl TransportError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A queue relay backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Create `queue` if it does not exist. Idempotent.
    async fn create_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Push one base64 body onto `queue`.
    async fn send(&self, queue: &str, body: &str) -> Result<(), TransportError>;

    /// Long-poll `queue` and return a batch of bodies, removed from the relay.
    ///
    /// An empty batch means the wait elapsed with nothing to deliver.
    async fn receive(&self, queue: &str) -> Result<Vec<String>, TransportError>;
}

/// The two relay queues belonging to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePair {
    /// Workstation to phone.
    pub outbound: String,
    /// Phone to workstation.
    pub inbound: String,
}

impl QueuePair {
    pub fn for_channel(channel_id: &Uuid) -> Self {
        let base = channel_id.to_string().to_uppercase();
        Self {
            inbound: format!("{base}-responder"),
            outbound: base,
        }
    }
}
