//! Daemon error taxonomy.
//!
//! Every variant carries a short machine tag (see [`DaemonError::tag`]) that
//! appears in logs and in control-socket error bodies.

use kr_crypto::CryptoError;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Not paired")]
    Unpaired,

    #[error("Waiting for the phone to complete pairing")]
    WaitingForKey,

    #[error("Request timed out")]
    Timeout,

    #[error("Request rejected on phone")]
    Rejected,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope failed authentication")]
    AuthenticationFailure,

    #[error("Relay unavailable: {0}")]
    RelayTransient(String),

    #[error("Relay error: {0}")]
    RelayFatal(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl DaemonError {
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Unpaired => "unpaired",
            Self::WaitingForKey => "waiting_for_key",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::AuthenticationFailure => "authentication_failure",
            Self::RelayTransient(_) => "relay_transient",
            Self::RelayFatal(_) => "relay_fatal",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<CryptoError> for DaemonError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            CryptoError::MalformedEnvelope(msg) | CryptoError::EncryptionFailed(msg) => {
                Self::MalformedEnvelope(msg)
            }
            err @ CryptoError::InvalidKeyLength { .. } => Self::MalformedEnvelope(err.to_string()),
        }
    }
}

impl From<TransportError> for DaemonError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Transient(msg) => Self::RelayTransient(msg),
            TransportError::Fatal(msg) => Self::RelayFatal(msg),
        }
    }
}

impl From<kr_core::Error> for DaemonError {
    fn from(err: kr_core::Error) -> Self {
        match err {
            kr_core::Error::InvalidRequest(msg) => Self::InvalidRequest(msg),
            kr_core::Error::Protocol(msg) => Self::ProtocolViolation(msg),
            kr_core::Error::Json(e) => Self::ProtocolViolation(e.to_string()),
            kr_core::Error::Config(msg) => Self::InvalidRequest(msg),
            kr_core::Error::Io(e) => Self::Persistence(e.to_string()),
        }
    }
}
