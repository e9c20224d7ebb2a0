//! Pairing file persistence.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use kr_core::KrPaths;
use tracing::{info, warn};

use super::{Channel, PersistedChannel};
use crate::error::DaemonError;

/// Reads and writes `pairing.json` under the kr directory.
#[derive(Debug, Clone)]
pub struct PairingStore {
    paths: KrPaths,
}

impl PairingStore {
    pub const fn new(paths: KrPaths) -> Self {
        Self { paths }
    }

    pub const fn paths(&self) -> &KrPaths {
        &self.paths
    }

    /// Load the persisted channel.
    ///
    /// A missing file means unpaired. An unreadable or invalid file is moved
    /// aside to `pairing.json.bad` and also treated as unpaired.
    pub fn load(&self) -> Option<Channel> {
        let path = self.paths.pairing_file();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read pairing file");
                self.quarantine();
                return None;
            }
        };

        let parsed = serde_json::from_slice::<PersistedChannel>(&data)
            .map_err(|e| DaemonError::Persistence(e.to_string()))
            .and_then(Channel::from_persisted);
        match parsed {
            Ok(channel) => {
                info!(
                    channel_id = %channel.channel_id(),
                    paired = channel.is_paired(),
                    "Loaded pairing"
                );
                Some(channel)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt pairing file");
                self.quarantine();
                None
            }
        }
    }

    /// Atomically replace the pairing file with `channel`.
    pub fn save(&self, channel: &Channel) -> Result<(), DaemonError> {
        let json = serde_json::to_vec_pretty(&channel.to_persisted())
            .map_err(|e| DaemonError::Persistence(e.to_string()))?;
        write_private(&self.paths.pairing_file(), &json)
            .map_err(|e| DaemonError::Persistence(format!("writing pairing file: {e}")))
    }

    pub fn delete(&self) -> Result<(), DaemonError> {
        match fs::remove_file(self.paths.pairing_file()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::Persistence(format!(
                "removing pairing file: {e}"
            ))),
        }
    }

    fn quarantine(&self) {
        if let Err(e) = fs::rename(
            self.paths.pairing_file(),
            self.paths.corrupt_pairing_file(),
        ) {
            warn!(error = %e, "Failed to move corrupt pairing file aside");
        }
    }
}

/// Create the owner-only kr directory if it does not exist yet.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
    ensure_private_dir(dir)?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
