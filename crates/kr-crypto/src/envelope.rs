//! Envelope framing: `header_byte || body`.

use crypto_box::{PublicKey, SecretKey};

use crate::error::CryptoError;
use crate::keys::{KEY_SIZE, public_key_from_bytes};
use crate::nacl::{box_open, box_seal, seal, unseal};

/// Leading byte of every envelope placed on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Header {
    /// Boxed message between paired peers.
    Ciphertext = 0x00,
    /// Legacy symmetric-key wrapping. Never accepted.
    WrappedKey = 0x01,
    /// Pairing completion: the phone's public key sealed to the workstation.
    WrappedPublicKey = 0x02,
}

impl TryFrom<u8> for Header {
    type Error = CryptoError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Self::Ciphertext),
            0x01 => Ok(Self::WrappedKey),
            0x02 => Ok(Self::WrappedPublicKey),
            other => Err(CryptoError::MalformedEnvelope(format!(
                "unknown header byte {other:#04x}"
            ))),
        }
    }
}

/// Split an envelope into its header and body.
pub fn split(envelope: &[u8]) -> Result<(Header, &[u8]), CryptoError> {
    let (&first, body) = envelope
        .split_first()
        .ok_or_else(|| CryptoError::MalformedEnvelope("empty envelope".into()))?;
    Ok((Header::try_from(first)?, body))
}

/// Prefix `body` with `header`.
pub fn frame(header: Header, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(header as u8);
    out.extend_from_slice(body);
    out
}

/// Box `plaintext` and frame it as [`Header::Ciphertext`].
pub fn encrypt_message(
    plaintext: &[u8],
    peer: &PublicKey,
    own: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    Ok(frame(Header::Ciphertext, &box_seal(plaintext, peer, own)?))
}

/// Open the body of a [`Header::Ciphertext`] envelope.
pub fn decrypt_message(
    body: &[u8],
    peer: &PublicKey,
    own: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    box_open(body, peer, own)
}

/// Build the pairing completion envelope the phone sends after scanning the QR code.
pub fn wrap_public_key(
    phone_public_key: &[u8; KEY_SIZE],
    workstation: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    Ok(frame(
        Header::WrappedPublicKey,
        &seal(phone_public_key, workstation)?,
    ))
}

/// Recover the phone's public key from a [`Header::WrappedPublicKey`] body.
pub fn unwrap_public_key(body: &[u8], own: &SecretKey) -> Result<PublicKey, CryptoError> {
    let opened = unseal(body, own)?;
    if opened.len() != KEY_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "wrapped public key is {} bytes, expected {KEY_SIZE}",
            opened.len()
        )));
    }
    public_key_from_bytes(&opened)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn split_reads_each_known_header() {
        assert_eq!(split(&[0x00, 1]).unwrap(), (Header::Ciphertext, &[1u8][..]));
        assert_eq!(split(&[0x01]).unwrap().0, Header::WrappedKey);
        assert_eq!(split(&[0x02, 9, 9]).unwrap().0, Header::WrappedPublicKey);
    }

    #[test]
    fn split_rejects_unknown_header() {
        assert!(matches!(
            split(&[0x07, 0, 0]),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn split_rejects_empty_envelope() {
        assert!(matches!(split(&[]), Err(CryptoError::MalformedEnvelope(_))));
    }

    #[test]
    fn encrypted_message_carries_ciphertext_header() {
        let ws = KeyPair::generate();
        let phone = KeyPair::generate();

        let env = encrypt_message(b"{}", phone.public_key(), ws.secret()).unwrap();
        let (header, body) = split(&env).unwrap();
        assert_eq!(header, Header::Ciphertext);
        let pt = decrypt_message(body, ws.public_key(), phone.secret()).unwrap();
        assert_eq!(pt, b"{}");
    }

    #[test]
    fn wrapped_public_key_unwraps_to_phone_key() {
        let ws = KeyPair::generate();
        let phone_pk = [0x11u8; 32];

        let env = wrap_public_key(&phone_pk, ws.public_key()).unwrap();
        let (header, body) = split(&env).unwrap();
        assert_eq!(header, Header::WrappedPublicKey);
        let pk = unwrap_public_key(body, ws.secret()).unwrap();
        assert_eq!(pk.as_bytes(), &phone_pk);
    }

    #[test]
    fn wrapped_payload_of_wrong_length_is_malformed() {
        let ws = KeyPair::generate();
        let sealed = seal(&[0x11u8; 31], ws.public_key()).unwrap();
        assert!(matches!(
            unwrap_public_key(&sealed, ws.secret()),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }
}
