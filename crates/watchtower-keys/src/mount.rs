//! gocryptfs mount lifecycle.
//!
//! The controller owns one mount point (the decrypted view) and re-derives
//! live state from the OS mount table; the cached flag only guards against
//! double mounts within this process. Every comparison against the mount
//! table uses canonicalized absolute paths.

use crate::runner::{SecretRunner, ToolOutput};
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use watchtower_core::password::PasswordGate;
use watchtower_core::{KeyStoreContext, SecretPrompt, WatchtowerError, WatchtowerResult};

pub const GOCRYPTFS_BIN: &str = "gocryptfs";
pub const FUSERMOUNT_BIN: &str = "fusermount";
pub const FINDMNT_BIN: &str = "findmnt";
pub const GOCRYPTFS_FS_TYPE: &str = "fuse.gocryptfs";

pub const MAX_MOUNT_RETRIES: u32 = 5;
pub const RETRY_PERIOD: Duration = Duration::from_secs(1);

/// `findmnt -J` payload, reduced to the fields we match on.
#[derive(Debug, Deserialize)]
struct MountTable {
    #[serde(default)]
    filesystems: Vec<MountEntry>,
}

#[derive(Debug, Deserialize)]
struct MountEntry {
    target: PathBuf,
}

/// Owns the gocryptfs mount for one store.
#[derive(Debug)]
pub struct MountController<R: SecretRunner> {
    runner: R,
    encrypted_dir: PathBuf,
    decrypted_dir: PathBuf,
    config_path: PathBuf,
    retry_mounting: bool,
    retry_period: Duration,
    mounted: bool,
}

impl<R: SecretRunner> MountController<R> {
    pub fn new(runner: R, ctx: &KeyStoreContext) -> Self {
        Self {
            runner,
            encrypted_dir: ctx.encrypted_dir().to_path_buf(),
            decrypted_dir: ctx.decrypted_dir().to_path_buf(),
            config_path: ctx.gocryptfs_config().to_path_buf(),
            retry_mounting: false,
            retry_period: RETRY_PERIOD,
            mounted: false,
        }
    }

    /// Enable the bounded retry loop for conflicting mounts (config-driven
    /// batch flows turn this on).
    pub fn set_retry_mounting(&mut self, retry: bool) {
        self.retry_mounting = retry;
    }

    /// Override the fixed delay between retries.
    pub fn set_retry_period(&mut self, period: Duration) {
        self.retry_period = period;
    }

    /// Whether this controller performed a mount that is still active.
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Probe that gocryptfs is installed at all.
    pub fn ensure_tool_installed(&mut self) -> WatchtowerResult<()> {
        let out = self.runner.run(GOCRYPTFS_BIN, &["--version"], None)?;
        if out.status != 0 {
            return Err(WatchtowerError::Subprocess(format!(
                "gocryptfs does not appear to be installed: {}",
                out.diagnostic()
            )));
        }
        Ok(())
    }

    /// Initialise the cipher store (`gocryptfs -init -plaintextnames`).
    pub fn init_store(&mut self, password: &str) -> WatchtowerResult<()> {
        let encrypted = self.encrypted_dir.to_string_lossy().into_owned();
        let out = self.runner.run(
            GOCRYPTFS_BIN,
            &["-init", "-plaintextnames", &encrypted],
            Some(password),
        )?;
        expect_success(GOCRYPTFS_BIN, "init", &out)
    }

    /// Check the store marker and mount, retrying around a conflicting mount
    /// when retry mode is enabled.
    ///
    /// Failures here never attempt an unmount: either nothing is mounted yet
    /// or the conflicting mount belongs to someone else.
    pub fn validate_and_mount(
        &mut self,
        gate: &mut PasswordGate,
        prompt: &mut dyn SecretPrompt,
    ) -> WatchtowerResult<()> {
        self.ensure_tool_installed()?;

        if !self.config_path.exists() {
            return Err(WatchtowerError::InvalidEncryptedDirectory(
                self.config_path.clone(),
            ));
        }

        if !self.is_already_mounted()? {
            return self.mount(gate, prompt);
        }

        if !self.retry_mounting {
            return Err(WatchtowerError::Subprocess(format!(
                "{} already mounted",
                self.decrypted_dir.display()
            )));
        }

        info!("gocryptfs filesystem already mounted");
        for _ in 0..MAX_MOUNT_RETRIES {
            info!("retrying in {:?}", self.retry_period);
            thread::sleep(self.retry_period);
            self.mount(gate, prompt)?;
            if self.mounted {
                return Ok(());
            }
        }

        Err(WatchtowerError::Subprocess(format!(
            "giving up, {} already mounted",
            self.decrypted_dir.display()
        )))
    }

    /// Mount the decrypted view. Idempotent: a second call in the same state
    /// performs no subprocess work.
    pub fn mount(
        &mut self,
        gate: &mut PasswordGate,
        prompt: &mut dyn SecretPrompt,
    ) -> WatchtowerResult<()> {
        if self.mounted {
            return Ok(());
        }
        if self.is_already_mounted()? {
            return Ok(());
        }

        let password = gate.obtain(prompt, "mount", true)?;
        let encrypted = self.encrypted_dir.to_string_lossy().into_owned();
        let decrypted = self.decrypted_dir.to_string_lossy().into_owned();
        let out = self
            .runner
            .run(GOCRYPTFS_BIN, &[&encrypted, &decrypted], Some(&password))?;
        expect_success(GOCRYPTFS_BIN, "mount", &out)?;

        self.mounted = true;
        Ok(())
    }

    /// Unmount the decrypted view. No-op unless this controller mounted it.
    pub fn unmount(&mut self) -> WatchtowerResult<()> {
        if !self.mounted {
            return Ok(());
        }

        let decrypted = self.decrypted_dir.to_string_lossy().into_owned();
        let out = self.runner.run(FUSERMOUNT_BIN, &["-u", &decrypted], None)?;
        expect_success(FUSERMOUNT_BIN, "unmount", &out)?;

        self.mounted = false;
        Ok(())
    }

    /// Query the OS mount table for an active gocryptfs mount at our target.
    pub fn is_already_mounted(&mut self) -> WatchtowerResult<bool> {
        let out = self.runner.run(
            FINDMNT_BIN,
            &["-n", "-o", "TARGET", "--type", GOCRYPTFS_FS_TYPE, "-J"],
            None,
        )?;

        // findmnt exits non-zero when no filesystem of the requested type is
        // mounted; an empty table is a valid "not mounted" answer.
        if out.stdout.trim().is_empty() {
            return Ok(false);
        }
        if out.status != 0 {
            return Err(WatchtowerError::Subprocess(format!(
                "findmnt failed: {}",
                out.diagnostic()
            )));
        }

        let table: MountTable = serde_json::from_str(&out.stdout)?;
        let Some(target) = canonicalize_existing(&self.decrypted_dir) else {
            // The mount point does not exist, so nothing can be mounted on it.
            return Ok(false);
        };

        Ok(table
            .filesystems
            .iter()
            .any(|entry| canonicalize_existing(&entry.target).as_deref() == Some(&target)))
    }
}

fn expect_success(program: &str, action: &str, out: &ToolOutput) -> WatchtowerResult<()> {
    if out.status == 0 {
        return Ok(());
    }
    Err(WatchtowerError::Subprocess(format!(
        "{program} {action} failed (exit code {}): {}",
        out.status,
        out.diagnostic()
    )))
}

fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    fs::canonicalize(path).ok()
}
