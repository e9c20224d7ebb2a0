//! Local endpoints: the control socket, the ssh-agent socket and the
//! host-auth socket.
//!
//! Sockets are opened by [`Listeners::bind`] and handed in already bound, so
//! nothing below this module cares how they were created.

pub mod agent;
pub mod control;
pub mod fallback;
pub mod host_auth;
pub mod socket;
pub mod userauth;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use kr_core::Config;

pub use agent::KrAgent;
pub use fallback::FallbackAgent;
pub use host_auth::HostAuthRegistry;
pub use socket::{Listeners, bind_private, remove_sockets};

use crate::EnclaveClient;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-connection limits for the local servers.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Upper bound on one control request or host-auth connection.
    pub request_timeout: Duration,
    /// How long an ssh signature waits for a matching host-auth report.
    pub host_auth_wait: Duration,
    /// Socket of another ssh-agent to merge into the agent endpoint.
    pub fallback_agent: Option<PathBuf>,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.daemon.request_timeout_ms),
            host_auth_wait: Duration::from_millis(config.daemon.host_auth_wait_ms),
            fallback_agent: config.daemon.fallback_agent.clone(),
        }
    }
}

/// Spawn one task per endpoint. Each stops accepting when `shutdown` flips.
pub fn spawn(
    listeners: Listeners,
    client: &Arc<EnclaveClient>,
    settings: &ServerSettings,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let host_auth = Arc::new(HostAuthRegistry::new());
    let router = control::router(Arc::clone(client), settings.request_timeout);
    let fallback = settings.fallback_agent.as_ref().map(FallbackAgent::new);
    if let Some(fallback) = &fallback {
        info!(socket = %fallback.socket().display(), "Merging fallback ssh-agent");
    }
    let agent = KrAgent::new(
        Arc::clone(client),
        Arc::clone(&host_auth),
        settings.host_auth_wait,
    )
    .with_fallback(fallback);

    vec![
        tokio::spawn(control::serve(
            listeners.control,
            router,
            shutdown.clone(),
        )),
        tokio::spawn(agent.serve(listeners.agent, shutdown.clone())),
        tokio::spawn(host_auth::serve(
            listeners.host_auth,
            host_auth,
            settings.request_timeout,
            shutdown.clone(),
        )),
    ]
}
