//! Crypto error types.

/// Errors from cryptographic operations and envelope framing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Authentication failure: ciphertext did not open")]
    AuthenticationFailure,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
