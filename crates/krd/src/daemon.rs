//! Wiring: relay workers, the enclave client and the local servers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use kr_core::{Config, KrPaths};

use crate::EnclaveClient;
use crate::channel::PairingStore;
use crate::server::{self, Listeners, ServerSettings};
use crate::transport::{RetryPolicy, Transport, spawn_poller, spawn_sender};

/// A running daemon core.
pub struct Daemon {
    client: Arc<EnclaveClient>,
    paths: KrPaths,
    settings: ServerSettings,
    grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("paths", &self.paths)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Load the pairing under `paths` and start the relay workers over `transport`.
    pub fn start(config: &Config, paths: KrPaths, transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = Duration::from_millis(config.daemon.shutdown_grace_ms);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.relay.send_queue.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.relay.send_queue.max(1));

        let client = Arc::new(EnclaveClient::new(
            PairingStore::new(paths.clone()),
            config.timeouts.clone(),
            version(),
            outbound_tx,
        ));

        let sender = spawn_sender(
            Arc::clone(&transport),
            RetryPolicy::for_sends(&config.relay),
            outbound_rx,
            shutdown_rx.clone(),
            grace,
        );
        let poller = spawn_poller(
            transport,
            RetryPolicy::for_polling(&config.relay),
            config.relay.dedup_capacity,
            client.subscribe_queues(),
            inbound_tx,
            shutdown_rx.clone(),
        );
        let dispatcher = client.start(inbound_rx, shutdown_rx);

        Self {
            client,
            paths,
            settings: ServerSettings::from_config(config),
            grace,
            shutdown_tx,
            tasks: vec![sender, poller, dispatcher],
        }
    }

    pub const fn client(&self) -> &Arc<EnclaveClient> {
        &self.client
    }

    pub const fn paths(&self) -> &KrPaths {
        &self.paths
    }

    /// Start serving the three local endpoints.
    pub fn serve(&mut self, listeners: Listeners) {
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.extend(server::spawn(
            listeners,
            &self.client,
            &self.settings,
            &shutdown,
        ));
    }

    /// Stop every task, flush the pairing file and remove the sockets.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        // The sender drains for up to `grace`; allow a little slack on top.
        let wait = self.grace + Duration::from_millis(500);
        let aborts: Vec<_> = self.tasks.iter().map(JoinHandle::abort_handle).collect();
        let mut running: JoinSet<()> = self
            .tasks
            .into_iter()
            .map(|task| async move {
                let _ = task.await;
            })
            .collect();
        let joined = tokio::time::timeout(wait, async {
            while running.join_next().await.is_some() {}
        });
        if joined.await.is_err() {
            warn!(
                remaining = running.len(),
                "Tasks still running after shutdown grace period; aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush pairing on shutdown");
        }
        server::remove_sockets(&self.paths);
        info!("Daemon stopped");
    }
}

/// This build's version.
pub fn version() -> semver::Version {
    semver::Version::parse(crate::VERSION).unwrap_or_else(|_| semver::Version::new(0, 0, 0))
}
