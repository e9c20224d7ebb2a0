//! kr workstation daemon library
//!
//! - Relay transport: long-poll queue client, replay filtering, retry
//! - Channel: pairing handshake, key material, persistence
//! - Enclave client: request/response correlation with the paired phone,
//!   approval-window cache
//! - Local servers: control (HTTP/JSON), ssh-agent, host-auth
//! - Daemon wiring shared by the binary and the integration tests

pub mod channel;
pub mod daemon;
pub mod enclave;
pub mod error;
pub mod server;
pub mod transport;

pub use enclave::EnclaveClient;
pub use error::DaemonError;

/// Version of this daemon, reported in the pairing QR code and `GET /version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
