//! Error taxonomy shared by every watchtower crate.
//!
//! Validation failures (key names, key types, weak passwords) are cheap local
//! checks and never touch the filesystem; everything else wraps the
//! underlying I/O, JSON, or subprocess cause so the CLI can print it before
//! exiting non-zero.

use std::path::PathBuf;
use thiserror::Error;

pub type WatchtowerResult<T> = Result<T, WatchtowerError>;

#[derive(Debug, Error)]
pub enum WatchtowerError {
    #[error("key name cannot be empty")]
    EmptyKeyName,

    #[error("key name cannot contain whitespace")]
    KeyNameContainsWhitespace,

    #[error("password entropy {actual:.1} bits is below the required {required:.1} bits")]
    InvalidPassword { actual: f64, required: f64 },

    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid encrypted directory: {0} is missing; initialise the store or delete the stale directories and retry")]
    InvalidEncryptedDirectory(PathBuf),

    #[error("invalid key type `{0}` (expected `gocryptfs` or `keystore`)")]
    InvalidKeyType(String),

    #[error("key file not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("invalid hex key in {path}: {reason}")]
    InvalidHexKey { path: PathBuf, reason: String },

    #[error("keystore: {0}")]
    Keystore(String),

    #[error("config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Subprocess(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
