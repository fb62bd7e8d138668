//! Interactive secret input and the password policy gate.
//!
//! All prompting goes through the `SecretPrompt` trait so backends can be
//! driven by canned responses in tests instead of a real terminal.

use crate::error::{WatchtowerError, WatchtowerResult};
use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

/// Minimum password entropy accepted by key-mutating operations.
pub const MIN_ENTROPY_BITS: f64 = 50.0;

/// Source of interactive input.
pub trait SecretPrompt {
    /// Read a secret without echoing it back.
    fn read_secret(&mut self, prompt: &str) -> WatchtowerResult<Zeroizing<String>>;

    /// Read a visible line (confirmation prompts).
    fn read_line(&mut self, prompt: &str) -> WatchtowerResult<String>;
}

/// Real terminal prompt backed by `rpassword` and stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn read_secret(&mut self, prompt: &str) -> WatchtowerResult<Zeroizing<String>> {
        let value = rpassword::prompt_password(prompt)?;
        Ok(Zeroizing::new(value))
    }

    fn read_line(&mut self, prompt: &str) -> WatchtowerResult<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

/// Prompts for a password once and caches it for the rest of the process.
///
/// The cache supports batch flows (several keys under one store) without
/// re-prompting; it is a usability trade-off, not a security boundary.
#[derive(Debug, Default)]
pub struct PasswordGate {
    cached: Option<Zeroizing<String>>,
}

impl PasswordGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached password, prompting on first use.
    ///
    /// The entropy policy applies unless `insecure` is set; a rejected
    /// password is not cached.
    pub fn obtain(
        &mut self,
        prompt: &mut dyn SecretPrompt,
        desc: &str,
        insecure: bool,
    ) -> WatchtowerResult<Zeroizing<String>> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }

        let password = prompt.read_secret(&format!("Enter password to {desc}: "))?;
        if !insecure {
            validate_password(&password)?;
        }

        self.cached = Some(password.clone());
        Ok(password)
    }
}

/// One-shot prompt that never caches (create/import/export of keystore files).
pub fn password_from_prompt(
    prompt: &mut dyn SecretPrompt,
    desc: &str,
    insecure: bool,
) -> WatchtowerResult<Zeroizing<String>> {
    let password = prompt.read_secret(&format!("Enter password to {desc}: "))?;
    if !insecure {
        validate_password(&password)?;
    }
    Ok(password)
}

/// Enforce the minimum-entropy policy.
pub fn validate_password(password: &str) -> WatchtowerResult<()> {
    let actual = estimate_entropy_bits(password);
    if actual < MIN_ENTROPY_BITS {
        return Err(WatchtowerError::InvalidPassword {
            actual,
            required: MIN_ENTROPY_BITS,
        });
    }
    Ok(())
}

/// Rough entropy estimate: `length * log2(pool)` where the pool is the sum of
/// the character-class sizes present in the password.
pub fn estimate_entropy_bits(password: &str) -> f64 {
    if password.is_empty() {
        return 0.0;
    }

    let mut pool = 0usize;
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        pool += 10;
    }
    if password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        pool += 32;
    }

    password.chars().count() as f64 * (pool as f64).log2()
}

/// Overwrite gate used by create/import.
///
/// Anything other than a trimmed lowercase `y` is treated as "no".
pub fn allow_key_overwrite(
    prompt: &mut dyn SecretPrompt,
    path: &std::path::Path,
) -> WatchtowerResult<bool> {
    if !path.exists() {
        return Ok(true);
    }

    let response =
        prompt.read_line("Key already exists, do you want to overwrite? (y/n): ")?;
    Ok(response.trim() == "y")
}
