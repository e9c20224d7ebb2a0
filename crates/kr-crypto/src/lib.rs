//! kr end-to-end encryption primitives.
//!
//! Everything that crosses the relay is a NaCl `crypto_box` (Curve25519,
//! XSalsa20-Poly1305) or a sealed box under the workstation key, prefixed
//! with a one-byte envelope header.
//!
//! ## Primitives
//!
//! - **Keys**: Curve25519 key pair generated once per channel
//! - **Box**: two-party authenticated encryption, 24-byte nonce prefixed to the output
//! - **Seal**: anonymous encryption to a public key, used for the pairing bootstrap
//! - **Channel id**: `UUID(SHA-256(workstation_pk)[0..16])`

pub mod envelope;
pub mod error;
pub mod keys;
pub mod nacl;

pub use crypto_box::{PublicKey, SecretKey};
pub use envelope::Header;
pub use error::CryptoError;
pub use keys::{KEY_SIZE, KeyPair, channel_id, public_key_from_bytes};
pub use nacl::{NONCE_SIZE, box_open, box_seal, seal, unseal};
