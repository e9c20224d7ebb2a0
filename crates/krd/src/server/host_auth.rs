//! Host authentication reports from the SSH helper.
//!
//! The helper connects to `krd-hostauth.sock` once per SSH connection and
//! writes a JSON [`HostAuth`]: the server's host key and its signature over
//! the session identifier. The agent later matches a userauth signing request
//! to a report by verifying that signature against the session identifier.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use kr_core::protocol::HostAuth;
use signature::Verifier;
use ssh_key::PublicKey;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::userauth::decode_signature;

/// Reports kept for matching.
pub const MAX_RECENT: usize = 50;
/// Largest report accepted on the socket.
pub const MAX_REPORT_BYTES: u64 = 64 * 1024;

#[derive(Debug, Default)]
pub struct HostAuthRegistry {
    recent: Mutex<VecDeque<HostAuth>>,
    arrivals: Notify,
}

impl HostAuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `report`, newest first. Reports whose key or signature do not
    /// parse are refused.
    pub async fn record(&self, report: HostAuth) -> Result<(), String> {
        PublicKey::from_bytes(&report.host_key).map_err(|e| format!("host key: {e}"))?;
        decode_signature(&report.signature).map_err(|e| format!("signature: {e}"))?;

        let mut recent = self.recent.lock().await;
        recent.push_front(report);
        recent.truncate(MAX_RECENT);
        drop(recent);
        self.arrivals.notify_waiters();
        Ok(())
    }

    /// The newest report whose signature verifies over `session_id`.
    pub async fn find(&self, session_id: &[u8]) -> Option<HostAuth> {
        self.recent
            .lock()
            .await
            .iter()
            .find(|report| verifies(report, session_id))
            .cloned()
    }

    /// Like [`Self::find`], waiting up to `wait` for a matching report to arrive.
    pub async fn await_for(&self, session_id: &[u8], wait: Duration) -> Option<HostAuth> {
        let deadline = Instant::now() + wait;
        loop {
            let arrival = self.arrivals.notified();
            if let Some(report) = self.find(session_id).await {
                return Some(report);
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return None;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.recent.lock().await.len()
    }
}

fn verifies(report: &HostAuth, session_id: &[u8]) -> bool {
    let Ok(host_key) = PublicKey::from_bytes(&report.host_key) else {
        return false;
    };
    let Ok(signature) = decode_signature(&report.signature) else {
        return false;
    };
    Verifier::verify(&host_key, session_id, &signature).is_ok()
}

/// Accept host-auth reports until shutdown.
pub async fn serve(
    listener: UnixListener,
    registry: Arc<HostAuthRegistry>,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move {
                        handle_connection(stream, &registry, read_timeout).await;
                    });
                }
                Err(e) => warn!(error = %e, "Host-auth accept failed"),
            },
            _ = shutdown.changed() => {
                info!("Host-auth listener shutting down");
                return;
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, registry: &HostAuthRegistry, read_timeout: Duration) {
    let mut body = Vec::new();
    let mut limited = stream.take(MAX_REPORT_BYTES + 1);
    match tokio::time::timeout(read_timeout, limited.read_to_end(&mut body)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!(error = %e, "Host-auth read failed");
            return;
        }
        Err(_) => {
            debug!("Host-auth connection timed out");
            return;
        }
    }
    if u64::try_from(body.len()).unwrap_or(u64::MAX) > MAX_REPORT_BYTES {
        warn!(bytes = body.len(), "Dropping oversized host-auth report");
        return;
    }

    let report: HostAuth = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "Dropping undecodable host-auth report");
            return;
        }
    };
    let host = report.host_names.first().cloned().unwrap_or_default();
    match registry.record(report).await {
        Ok(()) => debug!(%host, "Host-auth report recorded"),
        Err(e) => debug!(%host, error = %e, "Dropping invalid host-auth report"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::server::userauth::encode_signature;
    use signature::Signer;
    use ssh_key::PrivateKey;
    use ssh_key::private::Ed25519Keypair;
    use tokio::io::AsyncWriteExt;

    /// A report from a host key derived from `seed`, signing `session_id`.
    pub(crate) fn report(seed: u8, session_id: &[u8], host: &str) -> HostAuth {
        let key = PrivateKey::from(Ed25519Keypair::from_seed(&[seed; 32]));
        let signature: ssh_key::Signature = key.try_sign(session_id).unwrap();
        HostAuth {
            host_key: key.public_key().to_bytes().unwrap(),
            signature: encode_signature(&signature),
            host_names: vec![host.to_string()],
        }
    }

    #[tokio::test]
    async fn finds_report_signed_over_session() {
        let registry = HostAuthRegistry::new();
        registry.record(report(1, b"session-a", "a.example")).await.unwrap();
        registry.record(report(2, b"session-b", "b.example")).await.unwrap();

        let found = registry.find(b"session-a").await.unwrap();
        assert_eq!(found.host_names, vec!["a.example"]);
        assert!(registry.find(b"session-c").await.is_none());
    }

    #[tokio::test]
    async fn keeps_only_recent_reports() {
        let registry = HostAuthRegistry::new();
        let first = report(1, b"oldest", "old.example");
        registry.record(first).await.unwrap();
        let filler = report(2, b"filler", "filler.example");
        for _ in 0..MAX_RECENT {
            registry.record(filler.clone()).await.unwrap();
        }
        assert_eq!(registry.len().await, MAX_RECENT);
        assert!(registry.find(b"oldest").await.is_none());
    }

    #[tokio::test]
    async fn refuses_unparseable_reports() {
        let registry = HostAuthRegistry::new();
        let mut bad = report(1, b"s", "h");
        bad.host_key = vec![1, 2, 3];
        assert!(registry.record(bad).await.is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn await_for_wakes_on_late_report() {
        let registry = Arc::new(HostAuthRegistry::new());
        let late = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            late.record(report(3, b"sid", "late.example")).await.unwrap();
        });

        let found = registry.await_for(b"sid", Duration::from_secs(2)).await;
        assert_eq!(found.unwrap().host_names, vec!["late.example"]);
        assert!(
            registry
                .await_for(b"other", Duration::from_millis(20))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn socket_accepts_one_report_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostauth.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let registry = Arc::new(HostAuthRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(
            listener,
            Arc::clone(&registry),
            Duration::from_secs(1),
            shutdown_rx,
        ));

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let body = serde_json::to_vec(&report(4, b"sid", "sock.example")).unwrap();
        stream.write_all(&body).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        let found = registry.await_for(b"sid", Duration::from_secs(2)).await;
        assert!(found.is_some());

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
