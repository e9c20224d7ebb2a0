//! NaCl box and sealed box.
//!
//! `box_seal` output layout: `[24-byte nonce][ciphertext + 16-byte tag]`.
//! Sealed boxes carry their own ephemeral public key and derive the nonce
//! from it, so they need no extra framing.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};

use crate::error::CryptoError;

/// Nonce size for XSalsa20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Authenticated two-party encryption from `own` to `peer`.
pub fn box_seal(
    plaintext: &[u8],
    peer: &PublicKey,
    own: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = SalsaBox::new(peer, own);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a message produced by [`box_seal`] with the roles reversed.
pub fn box_open(
    ciphertext: &[u8],
    peer: &PublicKey,
    own: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "box too short: {} bytes",
            ciphertext.len()
        )));
    }
    let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
    let cipher = SalsaBox::new(peer, own);
    cipher
        .decrypt(GenericArray::from_slice(nonce), body)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// Anonymous encryption to `recipient`.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    recipient
        .seal(&mut OsRng, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Open a sealed box addressed to the holder of `own`.
pub fn unseal(ciphertext: &[u8], own: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    own.unseal(ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn box_open_reverses_box_seal() {
        let workstation = KeyPair::generate();
        let phone = KeyPair::generate();

        let ct = box_seal(b"sign this", phone.public_key(), workstation.secret()).unwrap();
        let pt = box_open(&ct, workstation.public_key(), phone.secret()).unwrap();
        assert_eq!(pt, b"sign this");
    }

    #[test]
    fn box_embeds_fresh_nonce() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let ct1 = box_seal(b"same", b.public_key(), a.secret()).unwrap();
        let ct2 = box_seal(b"same", b.public_key(), a.secret()).unwrap();
        assert_ne!(ct1[..NONCE_SIZE], ct2[..NONCE_SIZE]);
        assert_eq!(ct1.len(), NONCE_SIZE + TAG_SIZE + 4);
    }

    #[test]
    fn box_open_with_wrong_key_is_authentication_failure() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let eve = KeyPair::generate();

        let ct = box_seal(b"secret", b.public_key(), a.secret()).unwrap();
        let err = box_open(&ct, a.public_key(), eve.secret()).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn box_open_rejects_tampered_ciphertext() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let mut ct = box_seal(b"secret", b.public_key(), a.secret()).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(matches!(
            box_open(&ct, a.public_key(), b.secret()),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn box_open_rejects_truncated_input() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert!(matches!(
            box_open(&[0u8; 30], a.public_key(), b.secret()),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn unseal_reverses_seal() {
        let workstation = KeyPair::generate();
        let phone_pk = [0x11u8; 32];

        let sealed = seal(&phone_pk, workstation.public_key()).unwrap();
        let opened = unseal(&sealed, workstation.secret()).unwrap();
        assert_eq!(opened, phone_pk);
    }

    #[test]
    fn unseal_with_other_key_fails() {
        let workstation = KeyPair::generate();
        let other = KeyPair::generate();

        let sealed = seal(b"payload", workstation.public_key()).unwrap();
        assert!(matches!(
            unseal(&sealed, other.secret()),
            Err(CryptoError::AuthenticationFailure)
        ));
    }
}
