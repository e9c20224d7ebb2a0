//! Requests awaiting a response from the phone, keyed by request id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kr_core::protocol::{Fingerprint, RequestKind, Response};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::DaemonError;

/// A request that has been handed to the relay and not yet answered.
#[derive(Debug)]
pub struct PendingRequest {
    pub kind: RequestKind,
    /// Set for signing requests; used to evict the approval entry on failure.
    pub fingerprint: Option<Fingerprint>,
    pub created_at: Instant,
    responder: oneshot::Sender<Response>,
    ack: Option<oneshot::Sender<()>>,
}

/// Receiving half handed back to the waiter.
#[derive(Debug)]
pub struct Waiter {
    pub response: oneshot::Receiver<Response>,
    /// Fires when the phone acknowledges receipt.
    pub ack: oneshot::Receiver<()>,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    requests: HashMap<String, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request_id`. A second in-flight request with the same id is refused.
    pub fn insert(
        &mut self,
        request_id: &str,
        kind: RequestKind,
        fingerprint: Option<Fingerprint>,
    ) -> Result<Waiter, DaemonError> {
        if self.requests.contains_key(request_id) {
            return Err(DaemonError::InvalidRequest(format!(
                "request {request_id} is already in flight"
            )));
        }
        let (responder, response) = oneshot::channel();
        let (ack_tx, ack) = oneshot::channel();
        self.requests.insert(
            request_id.to_string(),
            PendingRequest {
                kind,
                fingerprint,
                created_at: Instant::now(),
                responder,
                ack: Some(ack_tx),
            },
        );
        debug!(request_id, %kind, "Request pending");
        Ok(Waiter { response, ack })
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.requests.get(request_id)
    }

    /// Remove the entry and return it; the caller resolves it.
    pub fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.requests.remove(request_id)
    }

    /// Signal the waiter that the phone received the request. Later acks are ignored.
    pub fn acknowledge(&mut self, request_id: &str) -> bool {
        let Some(ack) = self
            .requests
            .get_mut(request_id)
            .and_then(|pending| pending.ack.take())
        else {
            return false;
        };
        ack.send(()).is_ok()
    }

    /// Drop every entry. Waiters see their channels close.
    pub fn clear(&mut self) -> usize {
        let n = self.requests.len();
        self.requests.clear();
        n
    }

    /// How long the longest-waiting request has been outstanding.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.requests
            .values()
            .map(|pending| pending.created_at.elapsed())
            .max()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl PendingRequest {
    /// Deliver `response` to the waiter. Returns `false` if it already gave up.
    pub fn resolve(self, response: Response) -> bool {
        self.responder.send(response).is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use kr_core::protocol::{AckResponse, ResponseBody};

    #[test]
    fn duplicate_id_is_refused() {
        let mut table = PendingTable::new();
        let _waiter = table.insert("R1", RequestKind::Me, None).unwrap();
        let err = table.insert("R1", RequestKind::Me, None).unwrap_err();
        assert_eq!(err.tag(), "invalid_request");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn oldest_age_tracks_the_earliest_insert() {
        let mut table = PendingTable::new();
        assert_eq!(table.oldest_age(), None);
        let _first = table.insert("R1", RequestKind::Sign, None).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let _second = table.insert("R2", RequestKind::Me, None).unwrap();
        assert!(table.oldest_age().unwrap() >= Duration::from_millis(20));

        table.take("R1");
        assert!(table.oldest_age().unwrap() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn take_and_resolve_delivers_once() {
        let mut table = PendingTable::new();
        let waiter = table.insert("R1", RequestKind::Sign, None).unwrap();

        let pending = table.take("R1").unwrap();
        assert_eq!(pending.kind, RequestKind::Sign);
        assert!(pending.resolve(Response::new("R1", ResponseBody::Ack(AckResponse {}))));
        assert!(table.take("R1").is_none());
        assert_eq!(waiter.response.await.unwrap().request_id, "R1");
    }

    #[tokio::test]
    async fn acknowledge_fires_only_once() {
        let mut table = PendingTable::new();
        let waiter = table.insert("R1", RequestKind::Sign, None).unwrap();
        assert!(table.acknowledge("R1"));
        assert!(!table.acknowledge("R1"));
        assert!(!table.acknowledge("unknown"));
        waiter.ack.await.unwrap();
    }

    #[tokio::test]
    async fn clear_closes_waiters() {
        let mut table = PendingTable::new();
        let waiter = table.insert("R1", RequestKind::Me, None).unwrap();
        assert_eq!(table.clear(), 1);
        assert!(table.is_empty());
        assert!(waiter.response.await.is_err());
    }
}
