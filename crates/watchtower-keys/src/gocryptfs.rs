//! Filesystem-backed custody: keys are plaintext hex files inside a
//! gocryptfs mount.
//!
//! Every operation that touches key material goes through `ensure_unlocked`
//! first; `release` unmounts only what this process mounted.

use crate::backend::{
    format_file_time, resolve_key_name, CreatedKey, ExportedKey, KeyBackend, KeyRecord,
};
use crate::mount::MountController;
use crate::runner::SecretRunner;
use log::info;
use std::fs;
use std::path::PathBuf;
use watchtower_core::context::GOCRYPTFS_CONFIG_NAME;
use watchtower_core::keyfile;
use watchtower_core::password::{allow_key_overwrite, password_from_prompt, PasswordGate};
use watchtower_core::{
    EcdsaKey, KeyStoreContext, SecretPrompt, WatchtowerError, WatchtowerResult,
};
use zeroize::Zeroizing;

pub struct GocryptfsBackend<R: SecretRunner, P: SecretPrompt> {
    ctx: KeyStoreContext,
    controller: MountController<R>,
    gate: PasswordGate,
    prompt: P,
}

impl<R: SecretRunner, P: SecretPrompt> GocryptfsBackend<R, P> {
    pub fn new(ctx: KeyStoreContext, controller: MountController<R>, prompt: P) -> Self {
        Self {
            ctx,
            controller,
            gate: PasswordGate::new(),
            prompt,
        }
    }

    pub fn set_retry_mounting(&mut self, retry: bool) {
        self.controller.set_retry_mounting(retry);
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.ctx.decrypted_key_file(self.ctx.leaf_name(key))
    }

    fn write_new_key(
        &mut self,
        name: &str,
        key: EcdsaKey,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let path = self.key_path(name);
        if !allow_key_overwrite(&mut self.prompt, &path)? {
            info!("keeping existing key at {}", path.display());
            return Ok(None);
        }

        keyfile::write_key_file(&path, &key.to_hex())?;
        Ok(Some(CreatedKey {
            name: name.to_string(),
            address: key.address(),
            path,
        }))
    }
}

impl<R: SecretRunner, P: SecretPrompt> KeyBackend for GocryptfsBackend<R, P> {
    /// Create the store directories and run the cipher initialisation. The
    /// store password is subject to the entropy policy unless `insecure`.
    fn init(&mut self, insecure: bool) -> WatchtowerResult<()> {
        self.controller.ensure_tool_installed()?;

        if self.ctx.gocryptfs_config().exists() {
            return Err(WatchtowerError::Subprocess(format!(
                "encrypted store already initialised at {}",
                self.ctx.encrypted_dir().display()
            )));
        }

        keyfile::ensure_directory(self.ctx.encrypted_dir())?;
        keyfile::ensure_directory(self.ctx.decrypted_dir())?;

        let password =
            password_from_prompt(&mut self.prompt, "protect the encrypted store", insecure)?;
        self.controller.init_store(&password)?;
        info!("initialised encrypted store at {}", self.ctx.root().display());
        Ok(())
    }

    fn create(
        &mut self,
        name: Option<&str>,
        _insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let key = EcdsaKey::random();
        let name = resolve_key_name(name, &key)?;
        self.ensure_unlocked()?;
        self.write_new_key(&name, key)
    }

    fn import(
        &mut self,
        name: Option<&str>,
        private_key: &str,
        _insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let key = EcdsaKey::from_hex(private_key)?;
        let name = resolve_key_name(name, &key)?;
        self.ensure_unlocked()?;
        self.write_new_key(&name, key)
    }

    fn export(&mut self, name: &str) -> WatchtowerResult<ExportedKey> {
        self.ensure_unlocked()?;
        let hex_key = keyfile::read_key_file(&self.key_path(name))?;
        let key = EcdsaKey::from_hex(&hex_key)?;
        Ok(ExportedKey {
            address: key.address(),
            private_key_hex: hex_key,
        })
    }

    fn delete(&mut self, name: &str) -> WatchtowerResult<PathBuf> {
        self.ensure_unlocked()?;
        let path = self.key_path(name);
        if !path.is_file() {
            return Err(WatchtowerError::KeyNotFound(path));
        }
        fs::remove_file(&path)?;
        Ok(path)
    }

    /// Enumerate the decrypted view, excluding the store marker.
    fn list(&mut self) -> WatchtowerResult<Vec<KeyRecord>> {
        self.ensure_unlocked()?;

        let mut records = Vec::new();
        for entry in fs::read_dir(self.ctx.decrypted_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == GOCRYPTFS_CONFIG_NAME {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            records.push(KeyRecord {
                created: format_file_time(&meta),
                path: entry.path(),
                name,
            });
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn resolve_private_key(&mut self, key: &str) -> WatchtowerResult<Zeroizing<String>> {
        self.ensure_unlocked()?;
        keyfile::read_key_file(&self.key_path(key))
    }

    fn ensure_unlocked(&mut self) -> WatchtowerResult<()> {
        if self.controller.is_mounted() {
            return Ok(());
        }
        self.controller
            .validate_and_mount(&mut self.gate, &mut self.prompt)
    }

    fn release(&mut self) -> WatchtowerResult<()> {
        self.controller.unmount()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ToolOutput;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedPrompt {
        secrets: VecDeque<String>,
        lines: VecDeque<String>,
    }

    impl SecretPrompt for ScriptedPrompt {
        fn read_secret(&mut self, _prompt: &str) -> WatchtowerResult<Zeroizing<String>> {
            Ok(Zeroizing::new(
                self.secrets.pop_front().unwrap_or_else(|| "hunter2".into()),
            ))
        }

        fn read_line(&mut self, _prompt: &str) -> WatchtowerResult<String> {
            Ok(self.lines.pop_front().unwrap_or_default())
        }
    }

    /// Runner that reports "nothing mounted" and succeeds at everything.
    #[derive(Default)]
    struct AlwaysCleanRunner {
        calls: Vec<String>,
    }

    impl SecretRunner for AlwaysCleanRunner {
        fn run(
            &mut self,
            program: &str,
            args: &[&str],
            _secret: Option<&str>,
        ) -> WatchtowerResult<ToolOutput> {
            self.calls.push(format!("{program} {}", args.join(" ")));
            if program == crate::mount::FINDMNT_BIN {
                return Ok(ToolOutput {
                    status: 1,
                    ..ToolOutput::default()
                });
            }
            Ok(ToolOutput::default())
        }
    }

    impl SecretRunner for &mut AlwaysCleanRunner {
        fn run(
            &mut self,
            program: &str,
            args: &[&str],
            secret: Option<&str>,
        ) -> WatchtowerResult<ToolOutput> {
            (**self).run(program, args, secret)
        }
    }

    fn initialised_store(root: &std::path::Path) -> KeyStoreContext {
        let ctx = KeyStoreContext::with_root(root);
        std::fs::create_dir_all(ctx.encrypted_dir()).unwrap();
        std::fs::create_dir_all(ctx.decrypted_dir()).unwrap();
        std::fs::write(ctx.gocryptfs_config(), "marker").unwrap();
        ctx
    }

    fn backend_over(
        root: &std::path::Path,
    ) -> GocryptfsBackend<AlwaysCleanRunner, ScriptedPrompt> {
        let ctx = initialised_store(root);
        let controller = MountController::new(AlwaysCleanRunner::default(), &ctx);
        GocryptfsBackend::new(ctx, controller, ScriptedPrompt::default())
    }

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn create_writes_a_parseable_key_file() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());

        let created = backend.create(Some("alice"), false).unwrap().unwrap();
        assert_eq!(created.name, "alice");
        assert!(created.path.ends_with(".decrypted_keys/alice"));

        let exported = backend.export("alice").unwrap();
        assert_eq!(exported.address, created.address);
    }

    #[test]
    fn import_without_a_name_files_under_the_address() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());

        let created = backend.import(None, KEY, false).unwrap().unwrap();
        assert_eq!(created.name, created.address.to_checksum_string());
        assert_eq!(
            backend
                .export(&created.name)
                .unwrap()
                .private_key_hex
                .as_str(),
            KEY
        );
    }

    #[test]
    fn declined_overwrite_keeps_the_existing_key() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());

        backend.import(Some("alice"), KEY, false).unwrap().unwrap();
        backend.prompt.lines.push_back("n".into());
        assert!(backend.create(Some("alice"), false).unwrap().is_none());

        assert_eq!(backend.export("alice").unwrap().private_key_hex.as_str(), KEY);
    }

    #[test]
    fn list_excludes_the_store_marker() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());
        backend.import(Some("alice"), KEY, false).unwrap();
        // A marker inside the decrypted view must never show as a key.
        std::fs::write(
            backend.ctx.decrypted_dir().join(GOCRYPTFS_CONFIG_NAME),
            "marker",
        )
        .unwrap();

        let records = backend.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice");
        assert!(records[0].created.is_some());
    }

    #[test]
    fn delete_reports_missing_keys() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());
        assert!(matches!(
            backend.delete("ghost").unwrap_err(),
            WatchtowerError::KeyNotFound(_)
        ));
    }

    #[test]
    fn names_with_whitespace_never_reach_the_store() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());
        assert!(matches!(
            backend.create(Some("bad name"), false).unwrap_err(),
            WatchtowerError::KeyNameContainsWhitespace
        ));
    }

    #[test]
    fn failed_operation_still_releases_the_mount() {
        let dir = tempdir().unwrap();
        let mut runner = AlwaysCleanRunner::default();
        {
            let ctx = initialised_store(dir.path());
            let controller = MountController::new(&mut runner, &ctx);
            let mut backend = GocryptfsBackend::new(ctx, controller, ScriptedPrompt::default());

            // A successful create mounts the store; the failing export must
            // not prevent the release that follows.
            backend.create(Some("alice"), false).unwrap().unwrap();
            assert!(matches!(
                backend.export("ghost").unwrap_err(),
                WatchtowerError::KeyNotFound(_)
            ));
            backend.release().unwrap();
        }

        assert!(runner
            .calls
            .iter()
            .any(|call| call.starts_with("fusermount -u")));
    }

    #[test]
    fn init_refuses_an_initialised_store() {
        let dir = tempdir().unwrap();
        let mut backend = backend_over(dir.path());
        let err = backend.init(true).unwrap_err();
        assert!(err.to_string().contains("already initialised"));
    }
}
