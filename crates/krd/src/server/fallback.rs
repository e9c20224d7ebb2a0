//! Client for a pre-existing ssh-agent (usually whatever `SSH_AUTH_SOCK`
//! pointed at before krd was installed).
//!
//! Its identities are listed after the phone's, and signatures for keys it
//! holds never leave the workstation.

use std::path::{Path, PathBuf};

use ssh_agent_lib::agent::Session;
use ssh_agent_lib::client::Client;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{Identity, SignRequest};
use ssh_key::Signature;
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// A fresh connection is opened for every call.
#[derive(Clone, Debug)]
pub struct FallbackAgent {
    socket: PathBuf,
}

impl FallbackAgent {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn connect(&self) -> Option<Client<UnixStream>> {
        match UnixStream::connect(&self.socket).await {
            Ok(stream) => Some(Client::new(stream)),
            Err(e) => {
                debug!(socket = %self.socket.display(), error = %e, "Fallback agent unavailable");
                None
            }
        }
    }

    /// Identities held by the fallback agent. Empty when it cannot be reached.
    pub async fn identities(&self) -> Vec<Identity> {
        let Some(mut client) = self.connect().await else {
            return Vec::new();
        };
        match client.request_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                warn!(error = %e, "Fallback agent failed to list identities");
                Vec::new()
            }
        }
    }

    /// Sign with the fallback agent if it holds `request.pubkey`.
    ///
    /// `None` means the key is not the fallback's and the phone should be asked.
    pub async fn sign_if_held(
        &self,
        request: &SignRequest,
    ) -> Option<Result<Signature, AgentError>> {
        let mut client = self.connect().await?;
        let held = match client.request_identities().await {
            Ok(identities) => identities.iter().any(|id| id.pubkey == request.pubkey),
            Err(e) => {
                warn!(error = %e, "Fallback agent failed to list identities");
                false
            }
        };
        if !held {
            return None;
        }
        debug!(algorithm = %request.pubkey.algorithm(), "Signing with fallback agent");
        Some(client.sign(request.clone()).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use signature::{Signer, Verifier};
    use ssh_agent_lib::agent::listen;
    use ssh_key::PrivateKey;
    use ssh_key::private::Ed25519Keypair;
    use ssh_key::public::KeyData;

    /// An in-process ssh-agent holding one Ed25519 key.
    #[derive(Clone, Debug)]
    pub(crate) struct LocalAgent {
        key: PrivateKey,
    }

    impl LocalAgent {
        pub(crate) fn new(seed: u8) -> Self {
            Self {
                key: PrivateKey::from(Ed25519Keypair::from_seed(&[seed; 32])),
            }
        }

        pub(crate) fn public(&self) -> KeyData {
            self.key.public_key().key_data().clone()
        }

        /// Serve on `<dir>/agent.sock` in the background and return its path.
        pub(crate) fn spawn(self, dir: &Path) -> PathBuf {
            let path = dir.join("agent.sock");
            let listener = tokio::net::UnixListener::bind(&path).unwrap();
            tokio::spawn(async move {
                let _ = listen(listener, self).await;
            });
            path
        }
    }

    #[ssh_agent_lib::async_trait]
    impl Session for LocalAgent {
        async fn request_identities(&mut self) -> Result<Vec<Identity>, AgentError> {
            Ok(vec![Identity {
                pubkey: self.public(),
                comment: "local@workstation".into(),
            }])
        }

        async fn sign(&mut self, request: SignRequest) -> Result<Signature, AgentError> {
            self.key
                .try_sign(&request.data)
                .map_err(|e| AgentError::other(std::io::Error::other(e.to_string())))
        }
    }

    #[tokio::test]
    async fn lists_identities_from_the_other_agent() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalAgent::new(3);
        let public = local.public();
        let fallback = FallbackAgent::new(local.spawn(dir.path()));

        let identities = fallback.identities().await;
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].pubkey, public);
        assert_eq!(identities[0].comment, "local@workstation");
    }

    #[tokio::test]
    async fn signs_only_keys_it_holds() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalAgent::new(3);
        let public = local.public();
        let fallback = FallbackAgent::new(local.spawn(dir.path()));

        let held = SignRequest {
            pubkey: public.clone(),
            data: b"payload".to_vec(),
            flags: 0,
        };
        let signature = fallback.sign_if_held(&held).await.unwrap().unwrap();
        Verifier::verify(&ssh_key::PublicKey::from(public), b"payload", &signature).unwrap();

        let foreign = SignRequest {
            pubkey: LocalAgent::new(4).public(),
            data: b"payload".to_vec(),
            flags: 0,
        };
        assert!(fallback.sign_if_held(&foreign).await.is_none());
    }

    #[tokio::test]
    async fn missing_socket_is_silently_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = FallbackAgent::new(dir.path().join("gone.sock"));
        assert!(fallback.identities().await.is_empty());
        let request = SignRequest {
            pubkey: LocalAgent::new(3).public(),
            data: Vec::new(),
            flags: 0,
        };
        assert!(fallback.sign_if_held(&request).await.is_none());
    }
}
