//! Channel key pairs.
//!
//! Each channel owns one Curve25519 key pair, generated at pairing time and
//! kept for the channel's lifetime. The relay queue names derive from the
//! public half.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of Curve25519 public and secret keys.
pub const KEY_SIZE: usize = 32;

/// A Curve25519 key pair for one side of a channel.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &BASE64.encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = Zeroizing::new([0u8; KEY_SIZE]);
        arr.copy_from_slice(bytes);
        let secret = SecretKey::from(*arr);
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Raw secret key bytes, wiped when the returned value drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub const fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Stable channel identifier for this key pair's public half.
    pub fn channel_id(&self) -> Uuid {
        channel_id(self.public.as_bytes())
    }
}

/// Parse a peer public key, rejecting anything that is not exactly 32 bytes.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let arr: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
    Ok(PublicKey::from(arr))
}

/// `UUID(SHA-256(public_key)[0..16])`.
///
/// The bytes are taken as-is; no version or variant bits are forced.
pub fn channel_id(public_key: &[u8; KEY_SIZE]) -> Uuid {
    let digest = Sha256::digest(public_key);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair_produces_32_byte_keys() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_bytes().len(), 32);
        assert_eq!(kp.secret_bytes().len(), 32);
    }

    #[test]
    fn key_pair_restores_from_secret_bytes() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(kp.secret_bytes().as_slice()).unwrap();
        assert_eq!(restored.public_bytes(), kp.public_bytes());
        assert_eq!(*restored.secret_bytes(), *kp.secret_bytes());
    }

    #[test]
    fn two_key_pairs_are_distinct() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        assert_ne!(kp1.public_bytes(), kp2.public_bytes());
        assert_ne!(kp1.channel_id(), kp2.channel_id());
    }

    #[test]
    fn from_secret_bytes_rejects_wrong_length() {
        let err = KeyPair::from_secret_bytes(&[0u8; 16]).unwrap_err();
        match err {
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16,
            } => {}
            _ => panic!("wrong error: {err:?}"),
        }
    }

    #[test]
    fn public_key_from_bytes_rejects_short_input() {
        assert!(matches!(
            public_key_from_bytes(&[7u8; 31]),
            Err(CryptoError::InvalidKeyLength { actual: 31, .. })
        ));
        let pk = public_key_from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(pk.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn channel_id_is_sha256_prefix_of_public_key() {
        let pk = [0x42u8; 32];
        let digest = Sha256::digest(pk);
        assert_eq!(channel_id(&pk).as_bytes(), &digest[..16]);
    }

    #[test]
    fn channel_id_is_stable_for_same_key() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(kp.secret_bytes().as_slice()).unwrap();
        assert_eq!(kp.channel_id(), restored.channel_id());
    }

    #[test]
    fn debug_impl_redacts_secret() {
        let kp = KeyPair::generate();
        let debug_output = format!("{kp:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(&BASE64.encode(kp.secret_bytes().as_slice())));
    }
}
