//! In-process relay used by tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Transport, TransportError};

const MAX_BATCH: usize = 10;

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    failures: Mutex<VecDeque<TransportError>>,
    arrivals: Notify,
}

/// A relay whose queues live in memory. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<Inner>,
    wait: Duration,
}

impl std::fmt::Debug for MemoryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRelay")
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::with_wait(Duration::from_millis(200))
    }

    /// Relay whose `receive` long-polls for at most `wait`.
    pub fn with_wait(wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            wait,
        }
    }

    /// Enqueue a raw envelope as the phone would.
    pub async fn inject(&self, queue: &str, envelope: &[u8]) {
        self.push(queue, BASE64.encode(envelope)).await;
    }

    /// Enqueue an already-encoded body.
    pub async fn push(&self, queue: &str, body: String) {
        self.inner
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(body);
        self.inner.arrivals.notify_waiters();
    }

    /// Wait up to `timeout` for the next envelope on `queue` and remove it.
    pub async fn next_envelope(&self, queue: &str, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let arrival = self.inner.arrivals.notified();
            if let Some(body) = self.pop(queue).await {
                return BASE64.decode(body).ok();
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return None;
            }
        }
    }

    /// Remove and return everything currently on `queue`.
    pub async fn drain(&self, queue: &str) -> Vec<String> {
        self.inner
            .queues
            .lock()
            .await
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn queue_exists(&self, queue: &str) -> bool {
        self.inner.queues.lock().await.contains_key(queue)
    }

    /// Make the next relay call fail with `err`.
    pub async fn fail_next(&self, err: TransportError) {
        self.inner.failures.lock().await.push_back(err);
    }

    async fn pop(&self, queue: &str) -> Option<String> {
        self.inner
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    async fn injected_failure(&self) -> Result<(), TransportError> {
        match self.inner.failures.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MemoryRelay {
    async fn create_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.injected_failure().await?;
        self.inner
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn send(&self, queue: &str, body: &str) -> Result<(), TransportError> {
        self.injected_failure().await?;
        self.push(queue, body.to_string()).await;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Vec<String>, TransportError> {
        self.injected_failure().await?;
        let deadline = Instant::now() + self.wait;
        loop {
            let arrival = self.inner.arrivals.notified();
            {
                let mut queues = self.inner.queues.lock().await;
                if let Some(pending) = queues.get_mut(queue) {
                    if !pending.is_empty() {
                        let n = pending.len().min(MAX_BATCH);
                        return Ok(pending.drain(..n).collect());
                    }
                }
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_returns_pushed_bodies_in_order() {
        let relay = MemoryRelay::new();
        relay.send("Q", "one").await.unwrap();
        relay.send("Q", "two").await.unwrap();

        assert_eq!(relay.receive("Q").await.unwrap(), vec!["one", "two"]);
        assert!(relay.drain("Q").await.is_empty());
    }

    #[tokio::test]
    async fn receive_times_out_empty() {
        let relay = MemoryRelay::with_wait(Duration::from_millis(20));
        assert!(relay.receive("EMPTY").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_wakes_on_arrival() {
        let relay = MemoryRelay::with_wait(Duration::from_secs(5));
        let sender = relay.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.push("Q", "late".into()).await;
        });

        let started = std::time::Instant::now();
        assert_eq!(relay.receive("Q").await.unwrap(), vec!["late"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn receive_caps_batch_size() {
        let relay = MemoryRelay::new();
        for i in 0..15 {
            relay.push("Q", i.to_string()).await;
        }
        assert_eq!(relay.receive("Q").await.unwrap().len(), 10);
        assert_eq!(relay.receive("Q").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let relay = MemoryRelay::new();
        relay
            .fail_next(TransportError::Fatal("bad credentials".into()))
            .await;
        assert!(relay.send("Q", "x").await.is_err());
        assert!(relay.send("Q", "x").await.is_ok());
    }

    #[tokio::test]
    async fn next_envelope_decodes_base64() {
        let relay = MemoryRelay::new();
        relay.inject("Q", &[0, 1, 2]).await;
        assert_eq!(
            relay.next_envelope("Q", Duration::from_millis(50)).await,
            Some(vec![0, 1, 2])
        );
        assert_eq!(relay.next_envelope("Q", Duration::from_millis(10)).await, None);
    }
}
