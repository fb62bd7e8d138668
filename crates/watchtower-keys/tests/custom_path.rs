//! End-to-end flow over a config that points at a non-default store
//! location: the store roots rebind from the first encrypted key path and
//! later entries resolve inside the re-bound store.

use std::collections::VecDeque;
use tempfile::tempdir;
use watchtower_keys::backend::KeyBackend;
use watchtower_keys::runner::{SecretRunner, ToolOutput};
use watchtower_keys::{KeySource, KeystoreBackend};
use watchtower_core::{
    KeyStoreContext, KeyType, OperatorConfig, SecretPrompt, WatchtowerResult,
};
use zeroize::Zeroizing;

const ALICE_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const BOB_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000001";

#[derive(Default)]
struct ScriptedPrompt {
    secrets: VecDeque<String>,
}

impl SecretPrompt for ScriptedPrompt {
    fn read_secret(&mut self, _prompt: &str) -> WatchtowerResult<Zeroizing<String>> {
        Ok(Zeroizing::new(
            self.secrets.pop_front().unwrap_or_else(|| "hunter2".into()),
        ))
    }

    fn read_line(&mut self, _prompt: &str) -> WatchtowerResult<String> {
        Ok(String::new())
    }
}

struct NoopRunner;

impl SecretRunner for NoopRunner {
    fn run(
        &mut self,
        _program: &str,
        _args: &[&str],
        _secret: Option<&str>,
    ) -> WatchtowerResult<ToolOutput> {
        Ok(ToolOutput::default())
    }
}

#[test]
fn first_encrypted_key_path_pins_the_store_for_all_entries() {
    // Seed a keystore somewhere other than the default home layout.
    let store = tempdir().unwrap();
    let store_ctx = KeyStoreContext::with_root(store.path());
    let mut seed = KeystoreBackend::new(store_ctx.clone(), ScriptedPrompt::default());
    seed.init(true).unwrap();
    seed.import(Some("alice"), ALICE_KEY, true).unwrap().unwrap();
    seed.import(Some("bob"), BOB_KEY, true).unwrap().unwrap();

    // The config names the first key by full path and the second by name.
    let alice_path = store_ctx.keystore_key_file("alice");
    let config = OperatorConfig {
        watchtower_encrypted_keys: vec![
            alice_path.to_string_lossy().into_owned(),
            "bob".into(),
        ],
        encrypted_key_type: Some(KeyType::Keystore),
        ..OperatorConfig::default()
    };

    // The process default points elsewhere; the rebind must win.
    let default_ctx = KeyStoreContext::with_root("/home/nobody/.watchtower");
    let mut source =
        KeySource::new(config, default_ctx, NoopRunner, ScriptedPrompt::default()).unwrap();

    source.use_encrypted_keys().unwrap();
    let keys = source.watchtower_keys().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].to_hex().as_str(), ALICE_KEY);
    assert_eq!(keys[1].to_hex().as_str(), BOB_KEY);
    source.release().unwrap();
}

#[test]
fn bare_names_keep_the_default_store() {
    let home = tempdir().unwrap();
    let ctx = KeyStoreContext::with_root(home.path());
    let mut seed = KeystoreBackend::new(ctx.clone(), ScriptedPrompt::default());
    seed.init(true).unwrap();
    seed.import(Some("operator"), ALICE_KEY, true).unwrap().unwrap();

    let config = OperatorConfig {
        operator_encrypted_key: Some("operator".into()),
        encrypted_key_type: Some(KeyType::Keystore),
        ..OperatorConfig::default()
    };
    let mut source = KeySource::new(config, ctx, NoopRunner, ScriptedPrompt::default()).unwrap();

    let operator = source.operator_key().unwrap();
    assert_eq!(operator.to_hex().as_str(), ALICE_KEY);
}
