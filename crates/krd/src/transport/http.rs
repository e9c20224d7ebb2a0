//! HTTP queue relay client.
//!
//! Endpoints, relative to the relay base URL:
//! - `PUT  /queues/{name}`          create (idempotent)
//! - `POST /queues/{name}/messages` send one body
//! - `POST /queues/{name}/receive`  long-poll for a batch
//! - `POST /queues/{name}/delete`   delete a received batch by receipt

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kr_core::config::RelayConfig;

use super::{Transport, TransportError};

/// Two days, long enough for a phone that was offline over a weekend.
const RETENTION_SECS: u32 = 172_800;
const VISIBILITY_SECS: u32 = 1;

#[derive(Serialize)]
struct CreateQueue {
    retention_secs: u32,
    visibility_secs: u32,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct ReceiveMessages {
    max_messages: u32,
    wait_secs: u32,
}

#[derive(Deserialize)]
struct ReceivedBatch {
    #[serde(default)]
    messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
struct ReceivedMessage {
    body: String,
    receipt: String,
}

#[derive(Serialize)]
struct DeleteMessages {
    receipts: Vec<String>,
}

/// Relay client speaking JSON over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    base_url: String,
    receive_wait_secs: u32,
    max_messages: u32,
}

impl HttpRelay {
    pub fn new(base_url: &str, config: &RelayConfig) -> Result<Self, TransportError> {
        if base_url.is_empty() {
            return Err(TransportError::Fatal("relay url is empty".into()));
        }

        // reqwest is built with rustls-no-provider; Err means a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(u64::from(config.receive_wait_secs) + 10))
            .build()
            .map_err(|e| TransportError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            receive_wait_secs: config.receive_wait_secs,
            max_messages: config.max_messages,
        })
    }

    pub(crate) fn queue_url(&self, queue: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/queues/{queue}/{action}", self.base_url),
            None => format!("{}/queues/{queue}", self.base_url),
        }
    }

    async fn post<T: Serialize + Sync>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, TransportError> {
        self.http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(request_error)
    }

    async fn send_once(&self, queue: &str, body: &str) -> Result<StatusCode, TransportError> {
        let resp = self
            .post(&self.queue_url(queue, Some("messages")), &SendMessage { body })
            .await?;
        Ok(resp.status())
    }

    async fn receive_once(&self, queue: &str) -> Result<reqwest::Response, TransportError> {
        self.post(
            &self.queue_url(queue, Some("receive")),
            &ReceiveMessages {
                max_messages: self.max_messages,
                wait_secs: self.receive_wait_secs,
            },
        )
        .await
    }

    async fn delete_batch(&self, queue: &str, receipts: Vec<String>) {
        let result = self
            .post(
                &self.queue_url(queue, Some("delete")),
                &DeleteMessages { receipts },
            )
            .await
            .and_then(|resp| check_status(resp.status()));
        if let Err(e) = result {
            // Undeleted messages come back after the visibility timeout and are
            // filtered as replays.
            warn!(queue, error = %e, "Failed to delete received batch");
        }
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    TransportError::Transient(err.to_string())
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }
    let reason = status.canonical_reason().unwrap_or("Unknown");
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        Err(TransportError::Fatal(format!("{}: {reason}", status.as_u16())))
    } else {
        Err(TransportError::Transient(format!(
            "{}: {reason}",
            status.as_u16()
        )))
    }
}

#[async_trait]
impl Transport for HttpRelay {
    async fn create_queue(&self, queue: &str) -> Result<(), TransportError> {
        let resp = self
            .http
            .put(self.queue_url(queue, None))
            .json(&CreateQueue {
                retention_secs: RETENTION_SECS,
                visibility_secs: VISIBILITY_SECS,
            })
            .send()
            .await
            .map_err(request_error)?;
        check_status(resp.status())?;
        debug!(queue, "Queue ready");
        Ok(())
    }

    async fn send(&self, queue: &str, body: &str) -> Result<(), TransportError> {
        let mut status = self.send_once(queue, body).await?;
        if status == StatusCode::NOT_FOUND {
            self.create_queue(queue).await?;
            status = self.send_once(queue, body).await?;
        }
        check_status(status)
    }

    async fn receive(&self, queue: &str) -> Result<Vec<String>, TransportError> {
        let mut resp = self.receive_once(queue).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            self.create_queue(queue).await?;
            resp = self.receive_once(queue).await?;
        }
        check_status(resp.status())?;

        let batch: ReceivedBatch = resp
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("undecodable receive batch: {e}")))?;

        if batch.messages.is_empty() {
            return Ok(Vec::new());
        }

        let (bodies, receipts): (Vec<_>, Vec<_>) = batch
            .messages
            .into_iter()
            .map(|m| (m.body, m.receipt))
            .unzip();
        self.delete_batch(queue, receipts).await;
        Ok(bodies)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_is_fatal() {
        let err = HttpRelay::new("", &RelayConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Fatal(_)));
    }

    #[test]
    fn trailing_slash_stripped_from_base_url() {
        let relay = HttpRelay::new("https://relay.example/", &RelayConfig::default()).unwrap();
        assert_eq!(
            relay.queue_url("ABC-responder", Some("receive")),
            "https://relay.example/queues/ABC-responder/receive"
        );
        assert_eq!(relay.queue_url("ABC", None), "https://relay.example/queues/ABC");
    }

    #[test]
    fn client_errors_are_fatal_server_errors_transient() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN),
            Err(TransportError::Fatal(_))
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(TransportError::Transient(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(TransportError::Transient(_))
        ));
    }
}
