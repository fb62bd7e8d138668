//! Core building blocks shared by the watchtower operator binaries.
//!
//! Configuration, path resolution, password gating, and key material live
//! here so the custody backends and the CLI can focus on their own surfaces.

pub mod config;
pub mod context;
pub mod error;
pub mod keyfile;
pub mod logging;
pub mod password;
pub mod signer;

pub use config::OperatorConfig;
pub use context::{validate_key_name, KeyStoreContext, KeyType};
pub use error::{WatchtowerError, WatchtowerResult};
pub use password::{PasswordGate, SecretPrompt, TerminalPrompt};
pub use signer::{Address, EcdsaKey};
