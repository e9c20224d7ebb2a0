//! ssh-agent protocol front end.
//!
//! Identities come from the phone's `me` profile; signatures come from a
//! `sign` round trip. The agent never holds a private key. Keys held by a
//! configured fallback agent are listed after the phone's and signed there.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use ssh_agent_lib::agent::{Session, listen};
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{Identity, SignRequest as AgentSignRequest};
use ssh_key::public::KeyData;
use ssh_key::{Algorithm, HashAlg, PublicKey, Signature};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use kr_core::protocol::{Request, RequestBody, ResponseBody, SignRequest, SignResponse};

use super::fallback::FallbackAgent;
use super::host_auth::HostAuthRegistry;
use super::userauth::UserauthPayload;
use crate::EnclaveClient;
use crate::error::DaemonError;

/// `SSH_AGENT_RSA_SHA2_256`
const RSA_SHA2_256: u32 = 0x02;
/// `SSH_AGENT_RSA_SHA2_512`
const RSA_SHA2_512: u32 = 0x04;

/// Cloned per incoming connection by `ssh_agent_lib`.
#[derive(Clone, Debug)]
pub struct KrAgent {
    client: Arc<EnclaveClient>,
    host_auth: Arc<HostAuthRegistry>,
    host_auth_wait: Duration,
    fallback: Option<FallbackAgent>,
}

impl KrAgent {
    pub const fn new(
        client: Arc<EnclaveClient>,
        host_auth: Arc<HostAuthRegistry>,
        host_auth_wait: Duration,
    ) -> Self {
        Self {
            client,
            host_auth,
            host_auth_wait,
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<FallbackAgent>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Serve the agent protocol on `listener` until shutdown.
    pub async fn serve(self, listener: UnixListener, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            result = listen(listener, self) => {
                if let Err(e) = result {
                    warn!(error = %e, "ssh-agent listener stopped");
                }
            }
            _ = shutdown.changed() => info!("ssh-agent listener shutting down"),
        }
    }

    /// The phone's SSH key, or nothing while unpaired or unreachable.
    async fn phone_identity(&self) -> Result<Option<Identity>, AgentError> {
        let profile = match self.client.request_me(None).await {
            Ok(profile) => profile,
            Err(DaemonError::Unpaired | DaemonError::WaitingForKey) => {
                debug!("Not paired, listing no phone identity");
                return Ok(None);
            }
            Err(e) => {
                warn!(tag = e.tag(), error = %e, "Could not fetch phone profile");
                return Ok(None);
            }
        };

        let key = PublicKey::from_bytes(&profile.public_key_wire)
            .map_err(|e| other_err(format!("phone public key: {e}")))?;
        Ok(Some(Identity {
            pubkey: key.key_data().clone(),
            comment: profile.email,
        }))
    }
}

fn other_err(msg: impl Into<String>) -> AgentError {
    AgentError::other(io::Error::other(msg.into()))
}

/// SHA-256 over the key's SSH wire encoding, as the phone identifies keys.
pub fn key_fingerprint(key: &KeyData) -> Result<Vec<u8>, ssh_key::Error> {
    let wire = PublicKey::from(key.clone()).to_bytes()?;
    Ok(Sha256::digest(&wire).to_vec())
}

/// Signature algorithm to report for `key`.
///
/// RSA keys honour the agent flags first, then the algorithm the client
/// named in its userauth payload, and fall back to `ssh-rsa`.
pub fn signature_algorithm(key: &KeyData, flags: u32, requested: Option<&str>) -> Algorithm {
    let algorithm = key.algorithm();
    if !matches!(algorithm, Algorithm::Rsa { .. }) {
        return algorithm;
    }
    let hash = if flags & RSA_SHA2_512 != 0 {
        Some(HashAlg::Sha512)
    } else if flags & RSA_SHA2_256 != 0 {
        Some(HashAlg::Sha256)
    } else {
        match requested.and_then(|name| Algorithm::new(name).ok()) {
            Some(Algorithm::Rsa { hash }) => hash,
            _ => None,
        }
    };
    Algorithm::Rsa { hash }
}

#[ssh_agent_lib::async_trait]
impl Session for KrAgent {
    async fn request_identities(&mut self) -> Result<Vec<Identity>, AgentError> {
        let mut identities = self.phone_identity().await?.into_iter().collect::<Vec<_>>();
        if let Some(fallback) = &self.fallback {
            identities.extend(fallback.identities().await);
        }
        debug!(count = identities.len(), "request_identities");
        Ok(identities)
    }

    async fn sign(&mut self, request: AgentSignRequest) -> Result<Signature, AgentError> {
        if let Some(fallback) = &self.fallback {
            if let Some(signed) = fallback.sign_if_held(&request).await {
                return signed;
            }
        }

        let fingerprint = key_fingerprint(&request.pubkey)
            .map_err(|e| other_err(format!("encoding key: {e}")))?;

        let (data, session_id, requested) = match UserauthPayload::parse(&request.data) {
            Ok(payload) => (
                payload.stripped(),
                Some(payload.session_id.to_vec()),
                Some(payload.algorithm.to_string()),
            ),
            Err(e) => {
                debug!(error = %e, "Signing payload is not a userauth request");
                (request.data.clone(), None, None)
            }
        };

        let host_auth = match &session_id {
            Some(session_id) => {
                let found = self
                    .host_auth
                    .await_for(session_id, self.host_auth_wait)
                    .await;
                if found.is_none() {
                    debug!("No host-auth report for this session");
                }
                found
            }
            None => None,
        };

        let sign = Request::new(RequestBody::Sign(SignRequest {
            public_key_fingerprint: fingerprint,
            data,
            host_auth,
        }))
        .with_ack();
        let request_id = sign.request_id.clone();

        let response = self.client.request(sign).await.map_err(|e| {
            warn!(%request_id, tag = e.tag(), "ssh signature failed");
            other_err(e.tag())
        })?;

        let blob = match response.body {
            Some(ResponseBody::Sign(SignResponse {
                signature: Some(blob),
                ..
            })) => blob,
            Some(ResponseBody::Sign(SignResponse { error: Some(e), .. })) => {
                return Err(other_err(format!("phone refused to sign: {e}")));
            }
            _ => return Err(other_err("sign response without signature")),
        };

        let algorithm = signature_algorithm(&request.pubkey, request.flags, requested.as_deref());
        debug!(%request_id, algorithm = %algorithm, "ssh signature received");
        Signature::new(algorithm, blob).map_err(|e| other_err(format!("signature: {e}")))
    }
}
