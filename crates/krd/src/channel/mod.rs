//! The pairing between this workstation and one phone.
//!
//! A [`Channel`] owns the workstation key pair and, once pairing completes,
//! the phone's public key. It is half-paired until the phone's sealed public
//! key arrives, and paired afterwards.

mod store;

use kr_core::protocol::{PairingPayload, PairingStatus, Request, Response};
use kr_crypto::envelope;
use kr_crypto::{KeyPair, PublicKey, public_key_from_bytes};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DaemonError;
use crate::transport::QueuePair;

pub use store::{PairingStore, ensure_private_dir};

/// Pairing progress, as reported to local clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Unpaired,
    HalfPaired,
    Paired,
}

pub struct Channel {
    keys: KeyPair,
    peer_public_key: Option<PublicKey>,
    workstation_name: String,
    sns_endpoint: Option<String>,
    tracking_id: Option<String>,
    version: semver::Version,
    channel_id: Uuid,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("channel_id", &self.channel_id)
            .field("workstation_name", &self.workstation_name)
            .field("paired", &self.is_paired())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// On-disk form of a [`Channel`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedChannel {
    #[serde(with = "kr_core::protocol::b64")]
    workstation_public_key: Vec<u8>,
    #[serde(with = "kr_core::protocol::b64")]
    workstation_secret_key: Vec<u8>,
    #[serde(
        default,
        with = "kr_core::protocol::b64::option",
        skip_serializing_if = "Option::is_none"
    )]
    peer_public_key: Option<Vec<u8>>,
    workstation_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sns_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tracking_id: Option<String>,
    version: String,
}

impl Channel {
    /// A fresh half-paired channel with a newly generated key pair.
    pub fn create(workstation_name: String, version: semver::Version) -> Self {
        Self::with_keys(KeyPair::generate(), workstation_name, version)
    }

    fn with_keys(keys: KeyPair, workstation_name: String, version: semver::Version) -> Self {
        let channel_id = keys.channel_id();
        Self {
            keys,
            peer_public_key: None,
            workstation_name,
            sns_endpoint: None,
            tracking_id: None,
            version,
            channel_id,
        }
    }

    pub fn from_persisted(persisted: PersistedChannel) -> Result<Self, DaemonError> {
        let corrupt = |msg: String| DaemonError::Persistence(msg);

        let keys = KeyPair::from_secret_bytes(&persisted.workstation_secret_key)
            .map_err(|e| corrupt(format!("workstation secret key: {e}")))?;
        if keys.public_bytes().as_slice() != persisted.workstation_public_key.as_slice() {
            return Err(corrupt(
                "workstation public key does not match secret key".into(),
            ));
        }
        let peer_public_key = persisted
            .peer_public_key
            .map(|pk| public_key_from_bytes(&pk))
            .transpose()
            .map_err(|e| corrupt(format!("peer public key: {e}")))?;
        let version = semver::Version::parse(&persisted.version)
            .map_err(|e| corrupt(format!("version {:?}: {e}", persisted.version)))?;

        let mut channel = Self::with_keys(keys, persisted.workstation_name, version);
        channel.peer_public_key = peer_public_key;
        channel.sns_endpoint = persisted.sns_endpoint;
        channel.tracking_id = persisted.tracking_id;
        Ok(channel)
    }

    pub fn to_persisted(&self) -> PersistedChannel {
        PersistedChannel {
            workstation_public_key: self.keys.public_bytes().to_vec(),
            workstation_secret_key: self.keys.secret_bytes().to_vec(),
            peer_public_key: self.peer_public_key.as_ref().map(|pk| pk.as_bytes().to_vec()),
            workstation_name: self.workstation_name.clone(),
            sns_endpoint: self.sns_endpoint.clone(),
            tracking_id: self.tracking_id.clone(),
            version: self.version.to_string(),
        }
    }

    pub const fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn queues(&self) -> QueuePair {
        QueuePair::for_channel(&self.channel_id)
    }

    pub const fn is_paired(&self) -> bool {
        self.peer_public_key.is_some()
    }

    pub const fn state(&self) -> ChannelState {
        if self.is_paired() {
            ChannelState::Paired
        } else {
            ChannelState::HalfPaired
        }
    }

    pub fn workstation_name(&self) -> &str {
        &self.workstation_name
    }

    pub fn sns_endpoint(&self) -> Option<&str> {
        self.sns_endpoint.as_deref()
    }

    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }

    pub fn workstation_public_key(&self) -> [u8; kr_crypto::KEY_SIZE] {
        self.keys.public_bytes()
    }

    /// The QR code contents the phone scans.
    pub fn pairing_payload(&self) -> PairingPayload {
        PairingPayload {
            public_key: self.keys.public_bytes().to_vec(),
            workstation_name: self.workstation_name.clone(),
            version: self.version.to_string(),
        }
    }

    pub fn pairing_status(&self) -> PairingStatus {
        PairingStatus {
            workstation_name: self.workstation_name.clone(),
            channel_id: self.channel_id.to_string(),
            version: self.version.to_string(),
            profile: None,
        }
    }

    /// Store the phone's public key from a `WRAPPED_PUBLIC_KEY` body.
    ///
    /// Returns `false` without touching the channel if it is already paired.
    pub fn complete_pairing(&mut self, body: &[u8]) -> Result<bool, DaemonError> {
        if self.is_paired() {
            return Ok(false);
        }
        let peer = envelope::unwrap_public_key(body, self.keys.secret())?;
        self.peer_public_key = Some(peer);
        Ok(true)
    }

    /// Serialize and box `request` as a `CIPHERTEXT` envelope.
    pub fn seal_request(&self, request: &Request) -> Result<Vec<u8>, DaemonError> {
        let peer = self
            .peer_public_key
            .as_ref()
            .ok_or(DaemonError::WaitingForKey)?;
        let plaintext = serde_json::to_vec(request)
            .map_err(|e| DaemonError::ProtocolViolation(e.to_string()))?;
        Ok(envelope::encrypt_message(
            &plaintext,
            peer,
            self.keys.secret(),
        )?)
    }

    /// Open the body of a `CIPHERTEXT` envelope and decode the response.
    pub fn open_response(&self, body: &[u8]) -> Result<Response, DaemonError> {
        let peer = self
            .peer_public_key
            .as_ref()
            .ok_or(DaemonError::WaitingForKey)?;
        let plaintext = envelope::decrypt_message(body, peer, self.keys.secret())?;
        serde_json::from_slice(&plaintext).map_err(|e| DaemonError::ProtocolViolation(e.to_string()))
    }

    /// Apply `sns_endpoint_arn` and `tracking_id` from a response.
    ///
    /// Returns whether anything changed.
    pub fn update_metadata(&mut self, response: &Response) -> bool {
        let mut changed = false;
        if let Some(endpoint) = &response.sns_endpoint_arn {
            if self.sns_endpoint.as_ref() != Some(endpoint) {
                self.sns_endpoint = Some(endpoint.clone());
                changed = true;
            }
        }
        if let Some(tracking_id) = &response.tracking_id {
            if self.tracking_id.as_ref() != Some(tracking_id) {
                self.tracking_id = Some(tracking_id.clone());
                changed = true;
            }
        }
        changed
    }
}
