//! kr core library
//!
//! Shared functionality for the kr workstation daemon:
//! - Request/response protocol exchanged with the paired phone
//! - Configuration resolution
//! - `$HOME/.kr` layout
//! - Common error types and tracing setup

pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::KrPaths;
