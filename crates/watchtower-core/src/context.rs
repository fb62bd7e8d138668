//! On-disk layout rules for both key stores.
//!
//! A `KeyStoreContext` is built once per process and threaded through every
//! backend call, so the custom-path rebind is explicit instead of hiding in
//! module globals. Layout:
//!
//! ```text
//! <root>/.encrypted_keys/                gocryptfs cipher store
//! <root>/.encrypted_keys/gocryptfs.conf  store marker
//! <root>/.decrypted_keys/                mount point (plaintext view)
//! <root>/.keystore/<name>.ecdsa.key.json per-key encrypted keystore files
//! ```

use crate::error::{WatchtowerError, WatchtowerResult};
use directories_next::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_ROOT_DIR: &str = ".watchtower";
pub const ENCRYPTED_DIR_NAME: &str = ".encrypted_keys";
pub const DECRYPTED_DIR_NAME: &str = ".decrypted_keys";
pub const GOCRYPTFS_CONFIG_NAME: &str = "gocryptfs.conf";
pub const KEYSTORE_DIR_NAME: &str = ".keystore";
pub const KEYSTORE_SUFFIX: &str = ".ecdsa.key.json";

/// Storage backend selector. Immutable once a command begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Mountable gocryptfs store exposing a decrypted view of plaintext key files.
    Gocryptfs,
    /// Per-key password-encrypted JSON files, no mount step.
    Keystore,
}

impl FromStr for KeyType {
    type Err = WatchtowerError;

    fn from_str(value: &str) -> WatchtowerResult<Self> {
        match value {
            "gocryptfs" => Ok(KeyType::Gocryptfs),
            "keystore" => Ok(KeyType::Keystore),
            other => Err(WatchtowerError::InvalidKeyType(other.to_string())),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Gocryptfs => f.write_str("gocryptfs"),
            KeyType::Keystore => f.write_str("keystore"),
        }
    }
}

/// Resolved store roots for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreContext {
    root: PathBuf,
    encrypted_dir: PathBuf,
    decrypted_dir: PathBuf,
    gocryptfs_config: PathBuf,
    keystore_dir: PathBuf,
    custom_path: bool,
}

impl KeyStoreContext {
    /// Default layout under `~/.watchtower`.
    pub fn from_home() -> WatchtowerResult<Self> {
        let base = BaseDirs::new().ok_or_else(|| {
            WatchtowerError::InvalidConfig("unable to determine the home directory".into())
        })?;
        Ok(Self::with_root(base.home_dir().join(DEFAULT_ROOT_DIR)))
    }

    /// Layout rooted at an explicit directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let encrypted_dir = root.join(ENCRYPTED_DIR_NAME);
        let gocryptfs_config = encrypted_dir.join(GOCRYPTFS_CONFIG_NAME);
        Self {
            decrypted_dir: root.join(DECRYPTED_DIR_NAME),
            keystore_dir: root.join(KEYSTORE_DIR_NAME),
            encrypted_dir,
            gocryptfs_config,
            root,
            custom_path: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn encrypted_dir(&self) -> &Path {
        &self.encrypted_dir
    }

    pub fn decrypted_dir(&self) -> &Path {
        &self.decrypted_dir
    }

    pub fn gocryptfs_config(&self) -> &Path {
        &self.gocryptfs_config
    }

    pub fn keystore_dir(&self) -> &Path {
        &self.keystore_dir
    }

    /// Whether a custom key path has rebound the roots for this process.
    pub fn is_custom_path(&self) -> bool {
        self.custom_path
    }

    /// Rebind the store roots from the first key path found in a config file.
    ///
    /// Identifiers without directory components leave the defaults in place.
    /// The rebind happens at most once: when several encrypted keys are
    /// configured they are assumed to share one store, and the first path
    /// seen wins.
    pub fn rebind_from_key_path(&mut self, key_path: &str, key_type: KeyType) {
        if self.custom_path {
            return;
        }

        let path = Path::new(key_path);
        let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return;
        };

        match key_type {
            KeyType::Gocryptfs => {
                // `<root>/.decrypted_keys/<file>`: the store root is two
                // levels above the key file.
                let root = parent.parent().unwrap_or(parent);
                *self = Self::with_root(root);
            }
            KeyType::Keystore => {
                self.keystore_dir = parent.to_path_buf();
            }
        }
        self.custom_path = true;
    }

    /// Split the leaf name off a key identifier.
    ///
    /// In custom-path mode config entries carry full paths; only the final
    /// component names the key inside the (re-bound) store.
    pub fn leaf_name<'a>(&self, key: &'a str) -> &'a str {
        if !self.custom_path {
            return key;
        }
        Path::new(key)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(key)
    }

    /// Location of a plaintext key file inside the decrypted view.
    pub fn decrypted_key_file(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.decrypted_dir.join(name)
    }

    /// Location of a keystore file, appending the suffix when the name has no
    /// extension.
    pub fn keystore_key_file(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        let file_name = if path.extension().is_none() {
            format!("{name}{KEYSTORE_SUFFIX}")
        } else {
            name.to_string()
        };

        let candidate = Path::new(&file_name);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        self.keystore_dir.join(file_name)
    }
}

/// Reject names that would produce surprising file paths before any
/// filesystem operation runs.
pub fn validate_key_name(name: &str) -> WatchtowerResult<()> {
    if name.is_empty() {
        return Err(WatchtowerError::EmptyKeyName);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(WatchtowerError::KeyNameContainsWhitespace);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_hangs_off_the_root() {
        let ctx = KeyStoreContext::with_root("/data/store");
        assert_eq!(ctx.encrypted_dir(), Path::new("/data/store/.encrypted_keys"));
        assert_eq!(ctx.decrypted_dir(), Path::new("/data/store/.decrypted_keys"));
        assert_eq!(
            ctx.gocryptfs_config(),
            Path::new("/data/store/.encrypted_keys/gocryptfs.conf")
        );
        assert_eq!(ctx.keystore_dir(), Path::new("/data/store/.keystore"));
        assert!(!ctx.is_custom_path());
    }

    #[test]
    fn gocryptfs_key_path_rebinds_the_store_root() {
        let mut ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        ctx.rebind_from_key_path("/data/store/.decrypted_keys/alice", KeyType::Gocryptfs);

        assert!(ctx.is_custom_path());
        assert_eq!(ctx.root(), Path::new("/data/store"));
        assert_eq!(
            ctx.decrypted_key_file(ctx.leaf_name("bob")),
            PathBuf::from("/data/store/.decrypted_keys/bob")
        );
    }

    #[test]
    fn bare_name_leaves_defaults_untouched() {
        let mut ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        ctx.rebind_from_key_path("alice", KeyType::Gocryptfs);
        assert!(!ctx.is_custom_path());
        assert_eq!(ctx.root(), Path::new("/home/op/.watchtower"));
    }

    #[test]
    fn rebind_happens_at_most_once() {
        let mut ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        ctx.rebind_from_key_path("/data/a/.decrypted_keys/alice", KeyType::Gocryptfs);
        ctx.rebind_from_key_path("/data/b/.decrypted_keys/bob", KeyType::Gocryptfs);
        assert_eq!(ctx.root(), Path::new("/data/a"));
    }

    #[test]
    fn keystore_key_path_rebinds_only_the_keystore_dir() {
        let mut ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        ctx.rebind_from_key_path("/vault/keys/operator.ecdsa.key.json", KeyType::Keystore);
        assert_eq!(ctx.keystore_dir(), Path::new("/vault/keys"));
        assert_eq!(ctx.decrypted_dir(), Path::new("/home/op/.watchtower/.decrypted_keys"));
    }

    #[test]
    fn keystore_file_names_get_the_suffix() {
        let ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        assert_eq!(
            ctx.keystore_key_file("operator"),
            PathBuf::from("/home/op/.watchtower/.keystore/operator.ecdsa.key.json")
        );
        assert_eq!(
            ctx.keystore_key_file("operator.ecdsa.key.json"),
            PathBuf::from("/home/op/.watchtower/.keystore/operator.ecdsa.key.json")
        );
        assert_eq!(
            ctx.keystore_key_file("/abs/path/op.ecdsa.key.json"),
            PathBuf::from("/abs/path/op.ecdsa.key.json")
        );
    }

    #[test]
    fn leaf_name_splits_full_paths_only_in_custom_mode() {
        let mut ctx = KeyStoreContext::with_root("/home/op/.watchtower");
        assert_eq!(ctx.leaf_name("alice"), "alice");

        ctx.rebind_from_key_path("/data/store/.decrypted_keys/alice", KeyType::Gocryptfs);
        assert_eq!(ctx.leaf_name("/data/store/.decrypted_keys/alice"), "alice");
        assert_eq!(ctx.leaf_name("bob"), "bob");
    }

    #[test]
    fn key_names_are_validated_before_any_io() {
        assert!(matches!(
            validate_key_name(""),
            Err(WatchtowerError::EmptyKeyName)
        ));
        assert!(matches!(
            validate_key_name("has space"),
            Err(WatchtowerError::KeyNameContainsWhitespace)
        ));
        assert!(matches!(
            validate_key_name("tab\tname"),
            Err(WatchtowerError::KeyNameContainsWhitespace)
        ));
        assert!(validate_key_name("0xAbc123").is_ok());
    }

    #[test]
    fn key_type_parses_known_tags_only() {
        assert_eq!("gocryptfs".parse::<KeyType>().unwrap(), KeyType::Gocryptfs);
        assert_eq!("keystore".parse::<KeyType>().unwrap(), KeyType::Keystore);
        assert!(matches!(
            "vault".parse::<KeyType>(),
            Err(WatchtowerError::InvalidKeyType(_))
        ));
    }
}
