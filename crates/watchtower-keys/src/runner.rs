//! Execution wrapper for the external filesystem tools.
//!
//! Subprocess integration stays behind the `SecretRunner` trait so mount
//! logic is testable with a fake runner and deterministic output. Secrets are
//! written to the child's stdin as a single line and the pipe is closed
//! immediately afterwards.

use std::io::Write;
use std::process::{Command, Stdio};
use watchtower_core::{WatchtowerError, WatchtowerResult};

/// Collected output of a finished tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl ToolOutput {
    /// Stderr when present, stdout otherwise; used for diagnostics.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs external tools, optionally piping one secret line to stdin.
pub trait SecretRunner {
    fn run(
        &mut self,
        program: &str,
        args: &[&str],
        secret: Option<&str>,
    ) -> WatchtowerResult<ToolOutput>;
}

/// Real subprocess runner.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SecretRunner for SystemRunner {
    fn run(
        &mut self,
        program: &str,
        args: &[&str],
        secret: Option<&str>,
    ) -> WatchtowerResult<ToolOutput> {
        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if secret.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|err| {
            WatchtowerError::Subprocess(format!("failed to start {program}: {err}"))
        })?;

        if let Some(secret) = secret {
            // Write the secret and drop the handle so the child sees EOF.
            let mut stdin = child.stdin.take().ok_or_else(|| {
                WatchtowerError::Subprocess(format!("{program}: stdin pipe unavailable"))
            })?;
            stdin.write_all(secret.as_bytes()).map_err(|err| {
                WatchtowerError::Subprocess(format!("{program}: writing to stdin failed: {err}"))
            })?;
            stdin.write_all(b"\n").map_err(|err| {
                WatchtowerError::Subprocess(format!("{program}: writing to stdin failed: {err}"))
            })?;
        }

        let output = child.wait_with_output().map_err(|err| {
            WatchtowerError::Subprocess(format!("{program}: wait failed: {err}"))
        })?;

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}
