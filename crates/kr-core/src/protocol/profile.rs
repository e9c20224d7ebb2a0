use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// The phone's identity as reported by a `me` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// SSH wire encoding of the phone's public key.
    #[serde(with = "super::b64")]
    pub public_key_wire: Vec<u8>,
    pub email: String,
    #[serde(
        default,
        with = "super::b64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub pgp_pk: Option<Vec<u8>>,
}

impl Profile {
    /// Key algorithm name embedded in the wire blob, e.g. `ssh-ed25519`.
    pub fn key_type(&self) -> Option<&str> {
        let len_bytes: [u8; 4] = self.public_key_wire.get(..4)?.try_into().ok()?;
        let len = usize::try_from(u32::from_be_bytes(len_bytes)).ok()?;
        let name = self.public_key_wire.get(4..4usize.checked_add(len)?)?;
        std::str::from_utf8(name).ok()
    }

    /// `authorized_keys` line: `<type> <base64 wire> <email>`.
    pub fn authorized_key(&self) -> Option<String> {
        let key_type = self.key_type()?;
        Some(format!(
            "{key_type} {} {}",
            BASE64.encode(&self.public_key_wire),
            self.email
        ))
    }
}

/// Contents of the pairing QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPayload {
    #[serde(rename = "pk", with = "super::b64")]
    pub public_key: Vec<u8>,
    #[serde(rename = "n")]
    pub workstation_name: String,
    #[serde(rename = "v")]
    pub version: String,
}

/// Body of `GET /pair` once the channel is paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStatus {
    pub workstation_name: String,
    pub channel_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// A host key's signature over an SSH session identifier, reported by the SSH helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuth {
    /// SSH wire encoding of the server's host key.
    #[serde(with = "super::b64")]
    pub host_key: Vec<u8>,
    /// SSH wire encoding of the signature over the session identifier.
    #[serde(with = "super::b64")]
    pub signature: Vec<u8>,
    #[serde(default)]
    pub host_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAndHost {
    pub user: String,
    pub host: String,
}
