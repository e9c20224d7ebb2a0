//! Configuration resolution for krd.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. `<kr_dir>/krd.json`, if present (read-only; the daemon never writes it)
//! 3. `KR_*` environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete krd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Override for `$HOME/.kr`.
    pub kr_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    /// How long shutdown waits for queued envelopes to reach the relay.
    pub shutdown_grace_ms: u64,
    /// Upper bound on a single control-socket request.
    pub request_timeout_ms: u64,
    /// How long an ssh signature waits for the helper's host-auth report.
    pub host_auth_wait_ms: u64,
    /// Another ssh-agent whose keys are listed and used alongside the phone's.
    pub fallback_agent: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            kr_dir: None,
            log_level: "info".to_string(),
            log_json: false,
            shutdown_grace_ms: 2_000,
            request_timeout_ms: 120_000,
            host_auth_wait_ms: 1_000,
            fallback_agent: None,
        }
    }
}

/// Relay client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the queue relay.
    pub url: Option<String>,
    pub receive_wait_secs: u32,
    pub max_messages: u32,
    /// Number of recently seen message digests kept for replay filtering.
    pub dedup_capacity: usize,
    /// Outbound envelopes buffered ahead of the send worker.
    pub send_queue: usize,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_max_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            receive_wait_secs: 3,
            max_messages: 10,
            dedup_capacity: 256,
            send_queue: 128,
            retry_initial_ms: 250,
            retry_max_ms: 4_000,
            retry_max_attempts: 5,
        }
    }
}

/// Per-request-kind deadlines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// `me`, `list`, `hosts` and `unpair`.
    pub me_ms: u64,
    /// Requests issued while a pairing is being established.
    pub pair_ms: u64,
    /// `sign` and `git_sign` that may need the user's approval.
    pub sign_ms: u64,
    /// `sign` and `git_sign` inside a live approval window.
    pub approved_ms: u64,
    /// Deadline extension granted by an acknowledgement from the phone.
    pub ack_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            me_ms: 5_000,
            pair_ms: 90_000,
            sign_ms: 30_000,
            approved_ms: 3_000,
            ack_delay_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub const fn me(&self) -> Duration {
        Duration::from_millis(self.me_ms)
    }

    pub const fn pair(&self) -> Duration {
        Duration::from_millis(self.pair_ms)
    }

    pub const fn sign(&self) -> Duration {
        Duration::from_millis(self.sign_ms)
    }

    pub const fn approved(&self) -> Duration {
        Duration::from_millis(self.approved_ms)
    }

    pub const fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }
}

/// Load configuration from defaults, `<kr_dir>/krd.json` and the environment.
pub fn load_config(kr_dir: &Path) -> Result<Config> {
    let mut config = Config::default();

    let path = crate::KrPaths::new(kr_dir).config_file();
    if path.exists() {
        config = load_config_file(&path)?;
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let parse_ms = |key: &str, slot: &mut u64| {
        if let Some(n) = var(key).and_then(|v| v.parse().ok()) {
            *slot = n;
        }
    };
    parse_ms("KR_SIGN_TIMEOUT_MS", &mut config.timeouts.sign_ms);
    parse_ms("KR_ME_TIMEOUT_MS", &mut config.timeouts.me_ms);
    parse_ms("KR_PAIR_TIMEOUT_MS", &mut config.timeouts.pair_ms);
    parse_ms("KR_SHUTDOWN_GRACE_MS", &mut config.daemon.shutdown_grace_ms);

    if let Some(val) = var("KR_RELAY_URL") {
        config.relay.url = Some(val);
    }
    if let Some(val) = var("KR_LOG_LEVEL") {
        config.daemon.log_level = val;
    }

    // An empty KR_FALLBACK_AGENT turns the fallback off.
    match var("KR_FALLBACK_AGENT") {
        Some(val) if val.is_empty() => config.daemon.fallback_agent = None,
        Some(val) => config.daemon.fallback_agent = Some(PathBuf::from(val)),
        None if config.daemon.fallback_agent.is_none() => {
            config.daemon.fallback_agent = var("SSH_AUTH_SOCK")
                .map(PathBuf::from)
                .filter(|path| !is_krd_agent(path));
        }
        None => {}
    }
}

/// `SSH_AUTH_SOCK` may already point back at krd itself.
fn is_krd_agent(path: &Path) -> bool {
    path.as_os_str().is_empty()
        || path.file_name() == Some(std::ffi::OsStr::new(crate::paths::AGENT_SOCKET))
}
