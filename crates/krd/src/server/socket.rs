//! Unix socket setup.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kr_core::KrPaths;
use tokio::net::UnixListener;
use tracing::info;

use super::ServerError;
use crate::channel::ensure_private_dir;

/// Bind `path` owner-only, replacing a stale socket left by a previous run.
pub fn bind_private(path: &Path) -> Result<UnixListener, ServerError> {
    let bind_err = |source: std::io::Error| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        ensure_private_dir(dir).map_err(bind_err)?;
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_err)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(bind_err)?;
    info!(path = %path.display(), "Listening");
    Ok(listener)
}

/// The three local endpoints, already bound.
#[derive(Debug)]
pub struct Listeners {
    pub control: UnixListener,
    pub agent: UnixListener,
    pub host_auth: UnixListener,
}

impl Listeners {
    pub fn bind(paths: &KrPaths) -> Result<Self, ServerError> {
        Ok(Self {
            control: bind_private(&paths.control_socket())?,
            agent: bind_private(&paths.agent_socket())?,
            host_auth: bind_private(&paths.host_auth_socket())?,
        })
    }
}

/// Remove the socket files on shutdown. Missing files are fine.
pub fn remove_sockets(paths: &KrPaths) {
    let sockets: [PathBuf; 3] = [
        paths.control_socket(),
        paths.agent_socket(),
        paths.host_auth_socket(),
    ];
    for path in sockets {
        let _ = fs::remove_file(path);
    }
}
