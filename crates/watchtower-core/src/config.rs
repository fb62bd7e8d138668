//! Operator configuration model.
//!
//! The config file is JSON and mixes plaintext hex keys with encrypted-key
//! identifiers; the custody subsystem resolves the latter. RPC, gas, and
//! expiry settings are carried for the registration glue and validated here
//! only for shape.

use crate::context::KeyType;
use crate::error::{WatchtowerError, WatchtowerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_GAS_LIMIT: u64 = 300_000;
pub const DEFAULT_TX_RECEIPT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_EXPIRY_IN_DAYS: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Watchtower keys supplied directly as hex (no custody involved).
    pub watchtower_private_keys: Vec<String>,
    /// Watchtower keys held by one of the encrypted stores; entries are bare
    /// names or full paths into the store.
    pub watchtower_encrypted_keys: Vec<String>,
    pub operator_private_key: Option<String>,
    pub operator_encrypted_key: Option<String>,
    pub eth_rpc_url: String,
    pub gas_limit: u64,
    pub tx_receipt_timeout: u64,
    pub expiry_in_days: u64,
    pub external_signer_endpoint: Option<String>,
    /// Which backend holds the encrypted keys above.
    pub encrypted_key_type: Option<KeyType>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watchtower_private_keys: Vec::new(),
            watchtower_encrypted_keys: Vec::new(),
            operator_private_key: None,
            operator_encrypted_key: None,
            eth_rpc_url: String::new(),
            gas_limit: DEFAULT_GAS_LIMIT,
            tx_receipt_timeout: DEFAULT_TX_RECEIPT_TIMEOUT_SECS,
            expiry_in_days: DEFAULT_EXPIRY_IN_DAYS,
            external_signer_endpoint: None,
            encrypted_key_type: None,
        }
    }
}

impl OperatorConfig {
    /// Load and parse the config file at `path`.
    pub fn load(path: &Path) -> WatchtowerResult<Self> {
        let data = fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                WatchtowerError::InvalidConfig(format!(
                    "config file {} does not exist",
                    path.display()
                ))
            } else {
                WatchtowerError::Io(err)
            }
        })?;
        let config: OperatorConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether any key must be resolved through an encrypted store.
    pub fn uses_encrypted_keys(&self) -> bool {
        !self.watchtower_encrypted_keys.is_empty() || self.operator_encrypted_key.is_some()
    }

    /// The first encrypted key path, which pins the store root for the whole
    /// run (all encrypted keys are assumed to share one store).
    pub fn first_encrypted_key_path(&self) -> Option<&str> {
        self.watchtower_encrypted_keys
            .first()
            .map(String::as_str)
            .or(self.operator_encrypted_key.as_deref())
    }

    fn validate(&self) -> WatchtowerResult<()> {
        if self.uses_encrypted_keys() && self.encrypted_key_type.is_none() {
            return Err(WatchtowerError::InvalidConfig(
                "encrypted keys are configured but `encrypted_key_type` is not set".into(),
            ));
        }
        if self.operator_private_key.is_none()
            && self.operator_encrypted_key.is_none()
            && self.watchtower_private_keys.is_empty()
            && self.watchtower_encrypted_keys.is_empty()
        {
            return Err(WatchtowerError::InvalidConfig(
                "no operator or watchtower keys configured".into(),
            ));
        }
        Ok(())
    }
}

/// Convenience: the conventional config location under a store root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join("config").join("operator-config.json")
}
