//! Common surface over the two key custody backends.
//!
//! Backends return plain data; rendering (tables, messages) stays in the CLI.
//! A declined overwrite is not an error, so create/import return `Option`.

use crate::gocryptfs::GocryptfsBackend;
use crate::keystore::KeystoreBackend;
use crate::mount::MountController;
use crate::runner::SecretRunner;
use std::path::PathBuf;
use watchtower_core::{
    validate_key_name, Address, EcdsaKey, KeyStoreContext, KeyType, SecretPrompt,
    WatchtowerResult,
};
use zeroize::Zeroizing;

/// One key as shown by `keys list`.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub name: String,
    pub path: PathBuf,
    /// Filesystem timestamp, formatted for display.
    pub created: Option<String>,
}

/// Result of a create or import.
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub name: String,
    pub address: Address,
    pub path: PathBuf,
}

/// Result of an export. The hex key is zeroized on drop.
#[derive(Debug)]
pub struct ExportedKey {
    pub address: Address,
    pub private_key_hex: Zeroizing<String>,
}

/// Operations every custody backend supports.
///
/// `ensure_unlocked` and `release` bracket access to key material: for the
/// filesystem store they mount and unmount, for keystore files they are
/// no-ops. `release` must be safe to call in any state.
pub trait KeyBackend {
    fn init(&mut self, insecure: bool) -> WatchtowerResult<()>;

    /// Generate a key. Without a name the derived address is used. A `None`
    /// result means an existing key was kept.
    fn create(&mut self, name: Option<&str>, insecure: bool)
        -> WatchtowerResult<Option<CreatedKey>>;

    /// Store an externally supplied key.
    fn import(
        &mut self,
        name: Option<&str>,
        private_key: &str,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>>;

    fn export(&mut self, name: &str) -> WatchtowerResult<ExportedKey>;

    /// Remove the key, returning the deleted path.
    fn delete(&mut self, name: &str) -> WatchtowerResult<PathBuf>;

    fn list(&mut self) -> WatchtowerResult<Vec<KeyRecord>>;

    /// Resolve a config identifier (bare name or full path) to hex key
    /// material.
    fn resolve_private_key(&mut self, key: &str) -> WatchtowerResult<Zeroizing<String>>;

    fn ensure_unlocked(&mut self) -> WatchtowerResult<()>;

    fn release(&mut self) -> WatchtowerResult<()>;
}

/// Backend chosen by the `--key-type` flag or the config file.
pub enum SelectedBackend<R: SecretRunner, P: SecretPrompt> {
    Gocryptfs(GocryptfsBackend<R, P>),
    Keystore(KeystoreBackend<P>),
}

impl<R: SecretRunner, P: SecretPrompt> SelectedBackend<R, P> {
    pub fn select(key_type: KeyType, ctx: KeyStoreContext, runner: R, prompt: P) -> Self {
        match key_type {
            KeyType::Gocryptfs => {
                let controller = MountController::new(runner, &ctx);
                SelectedBackend::Gocryptfs(GocryptfsBackend::new(ctx, controller, prompt))
            }
            KeyType::Keystore => SelectedBackend::Keystore(KeystoreBackend::new(ctx, prompt)),
        }
    }

    /// Turn on the bounded mount retry loop (config-driven batch flows).
    pub fn set_retry_mounting(&mut self, retry: bool) {
        if let SelectedBackend::Gocryptfs(backend) = self {
            backend.set_retry_mounting(retry);
        }
    }
}

impl<R: SecretRunner, P: SecretPrompt> KeyBackend for SelectedBackend<R, P> {
    fn init(&mut self, insecure: bool) -> WatchtowerResult<()> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.init(insecure),
            SelectedBackend::Keystore(b) => b.init(insecure),
        }
    }

    fn create(
        &mut self,
        name: Option<&str>,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.create(name, insecure),
            SelectedBackend::Keystore(b) => b.create(name, insecure),
        }
    }

    fn import(
        &mut self,
        name: Option<&str>,
        private_key: &str,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.import(name, private_key, insecure),
            SelectedBackend::Keystore(b) => b.import(name, private_key, insecure),
        }
    }

    fn export(&mut self, name: &str) -> WatchtowerResult<ExportedKey> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.export(name),
            SelectedBackend::Keystore(b) => b.export(name),
        }
    }

    fn delete(&mut self, name: &str) -> WatchtowerResult<PathBuf> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.delete(name),
            SelectedBackend::Keystore(b) => b.delete(name),
        }
    }

    fn list(&mut self) -> WatchtowerResult<Vec<KeyRecord>> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.list(),
            SelectedBackend::Keystore(b) => b.list(),
        }
    }

    fn resolve_private_key(&mut self, key: &str) -> WatchtowerResult<Zeroizing<String>> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.resolve_private_key(key),
            SelectedBackend::Keystore(b) => b.resolve_private_key(key),
        }
    }

    fn ensure_unlocked(&mut self) -> WatchtowerResult<()> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.ensure_unlocked(),
            SelectedBackend::Keystore(b) => b.ensure_unlocked(),
        }
    }

    fn release(&mut self) -> WatchtowerResult<()> {
        match self {
            SelectedBackend::Gocryptfs(b) => b.release(),
            SelectedBackend::Keystore(b) => b.release(),
        }
    }
}

/// The stored name for a new key: the given name after validation, or the
/// derived address when none was given.
pub(crate) fn resolve_key_name(name: Option<&str>, key: &EcdsaKey) -> WatchtowerResult<String> {
    match name {
        Some(name) => {
            validate_key_name(name)?;
            Ok(name.to_string())
        }
        None => Ok(key.address().to_checksum_string()),
    }
}

/// Display format for key timestamps.
pub(crate) const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

pub(crate) fn format_file_time(meta: &std::fs::Metadata) -> Option<String> {
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    let local: chrono::DateTime<chrono::Local> = time.into();
    Some(local.format(TIMESTAMP_FORMAT).to_string())
}
