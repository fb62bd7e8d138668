//! Config-driven key resolution for the registration commands.
//!
//! The operator config mixes plaintext hex keys with identifiers into an
//! encrypted store. A `KeySource` hides the difference: it rebinds the store
//! roots from the first encrypted key path, unlocks the store once, resolves
//! every key through the cached password, and releases the store afterwards.

use crate::backend::{KeyBackend, SelectedBackend};
use crate::runner::SecretRunner;
use log::info;
use std::path::Path;
use watchtower_core::{
    EcdsaKey, KeyStoreContext, OperatorConfig, SecretPrompt, WatchtowerError, WatchtowerResult,
};

pub struct KeySource<R: SecretRunner, P: SecretPrompt> {
    config: OperatorConfig,
    backend: Option<SelectedBackend<R, P>>,
}

impl<R: SecretRunner, P: SecretPrompt> KeySource<R, P> {
    /// Build a source over `config`. The runner and prompt are only used when
    /// the config references an encrypted store.
    pub fn new(
        config: OperatorConfig,
        mut ctx: KeyStoreContext,
        runner: R,
        prompt: P,
    ) -> WatchtowerResult<Self> {
        let backend = match config.encrypted_key_type {
            Some(key_type) if config.uses_encrypted_keys() => {
                if let Some(first) = config.first_encrypted_key_path() {
                    ctx.rebind_from_key_path(first, key_type);
                    if ctx.is_custom_path() {
                        info!("using key store rooted at {}", ctx.root().display());
                    }
                }
                let mut backend = SelectedBackend::select(key_type, ctx, runner, prompt);
                // Batch flows tolerate a transient conflicting mount.
                backend.set_retry_mounting(true);
                Some(backend)
            }
            _ => None,
        };
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Unlock the encrypted store, if any. Idempotent.
    pub fn use_encrypted_keys(&mut self) -> WatchtowerResult<()> {
        if let Some(backend) = &mut self.backend {
            backend.ensure_unlocked()?;
        }
        Ok(())
    }

    /// The operator signing key, from either config field.
    pub fn operator_key(&mut self) -> WatchtowerResult<EcdsaKey> {
        if let Some(hex_key) = self.config.operator_private_key.clone() {
            return EcdsaKey::from_hex(&hex_key);
        }
        if let Some(encrypted) = self.config.operator_encrypted_key.clone() {
            return self.resolve_encrypted(&encrypted);
        }
        Err(WatchtowerError::InvalidConfig(
            "no operator key configured".into(),
        ))
    }

    /// Every watchtower signing key, plaintext entries first.
    pub fn watchtower_keys(&mut self) -> WatchtowerResult<Vec<EcdsaKey>> {
        let mut keys = Vec::new();
        for hex_key in self.config.watchtower_private_keys.clone() {
            keys.push(EcdsaKey::from_hex(&hex_key)?);
        }
        for encrypted in self.config.watchtower_encrypted_keys.clone() {
            keys.push(self.resolve_encrypted(&encrypted)?);
        }
        Ok(keys)
    }

    fn resolve_encrypted(&mut self, key: &str) -> WatchtowerResult<EcdsaKey> {
        let backend = self.backend.as_mut().ok_or_else(|| {
            WatchtowerError::InvalidConfig(format!(
                "key {key} requires an encrypted store but `encrypted_key_type` is not set"
            ))
        })?;
        backend.ensure_unlocked()?;
        let hex_key = backend.resolve_private_key(key)?;
        EcdsaKey::from_hex(&hex_key)
    }

    /// Unmount anything this source mounted. Safe to call in any state.
    pub fn release(&mut self) -> WatchtowerResult<()> {
        if let Some(backend) = &mut self.backend {
            backend.release()?;
        }
        Ok(())
    }
}

/// Load a config file and wrap it in a source.
pub fn from_config_file<R: SecretRunner, P: SecretPrompt>(
    path: &Path,
    ctx: KeyStoreContext,
    runner: R,
    prompt: P,
) -> WatchtowerResult<KeySource<R, P>> {
    let config = OperatorConfig::load(path)?;
    KeySource::new(config, ctx, runner, prompt)
}
