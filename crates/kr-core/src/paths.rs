//! Layout of the `$HOME/.kr` directory.

use std::path::{Path, PathBuf};

/// Control socket (HTTP/JSON).
pub const CONTROL_SOCKET: &str = "krd.sock";
/// ssh-agent socket.
pub const AGENT_SOCKET: &str = "krd-agent.sock";
/// Host authentication socket used by the SSH helper.
pub const HOST_AUTH_SOCKET: &str = "krd-hostauth.sock";
/// Persisted channel.
pub const PAIRING_FILE: &str = "pairing.json";
/// Where an unreadable pairing file is moved for inspection.
pub const CORRUPT_PAIRING_FILE: &str = "pairing.json.bad";
/// Optional daemon configuration.
pub const CONFIG_FILE: &str = "krd.json";

/// `$HOME/.kr`, if a home directory can be determined.
pub fn default_kr_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kr"))
}

/// Resolved file locations under one kr directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrPaths {
    root: PathBuf,
}

impl KrPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn control_socket(&self) -> PathBuf {
        self.root.join(CONTROL_SOCKET)
    }

    pub fn agent_socket(&self) -> PathBuf {
        self.root.join(AGENT_SOCKET)
    }

    pub fn host_auth_socket(&self) -> PathBuf {
        self.root.join(HOST_AUTH_SOCKET)
    }

    pub fn pairing_file(&self) -> PathBuf {
        self.root.join(PAIRING_FILE)
    }

    pub fn corrupt_pairing_file(&self) -> PathBuf {
        self.root.join(CORRUPT_PAIRING_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}
