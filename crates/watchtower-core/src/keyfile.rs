//! Plaintext key-file helpers shared by both backends.
//!
//! Keys are stored as 64 hex digits; the gocryptfs layer is what protects
//! them at rest. Writes go through a temp file in the destination directory
//! with restrictive permissions before the final rename.

use crate::error::{WatchtowerError, WatchtowerResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Normalise a user-supplied private key: strip an optional `0x` prefix,
/// trim surrounding whitespace, and require exactly 64 hex digits.
pub fn normalize_hex_key(origin: &Path, raw: &str) -> WatchtowerResult<Zeroizing<String>> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(invalid_key(origin, "key is empty"));
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(invalid_key(origin, format!("found non-hex character {bad:?}")));
    }
    if digits.len() != 64 {
        return Err(invalid_key(
            origin,
            format!("hex key must contain exactly 64 hex digits (got {})", digits.len()),
        ));
    }

    Ok(Zeroizing::new(digits.to_ascii_lowercase()))
}

/// Read and normalise the key stored at `path`.
pub fn read_key_file(path: &Path) -> WatchtowerResult<Zeroizing<String>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => Zeroizing::new(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(WatchtowerError::KeyNotFound(path.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    normalize_hex_key(path, &contents)
}

/// Write `key_hex` to `path` atomically with owner-only permissions.
pub fn write_key_file(path: &Path, key_hex: &str) -> WatchtowerResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.as_file_mut().write_all(key_hex.as_bytes())?;
    temp.as_file_mut().flush()?;
    #[cfg(unix)]
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))?;

    temp.persist(path)
        .map_err(|err| WatchtowerError::Io(err.error))?;
    Ok(())
}

/// Ensure a directory exists, surfacing a path collision as `NotADirectory`.
pub fn ensure_directory(path: &Path) -> WatchtowerResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(WatchtowerError::NotADirectory(path.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("creating directory {}", path.display());
            fs::create_dir_all(path)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn invalid_key(path: &Path, reason: impl Into<String>) -> WatchtowerError {
    WatchtowerError::InvalidHexKey {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn normalize_strips_prefix_and_lowercases() {
        let upper = KEY.to_ascii_uppercase();
        let prefixed = format!("0x{upper}");
        let key = normalize_hex_key(Path::new("dummy"), &prefixed).unwrap();
        assert_eq!(key.as_str(), KEY);
    }

    #[test]
    fn normalize_rejects_bad_lengths_and_digits() {
        for raw in ["", "abc", "zz", &KEY[..62]] {
            let err = normalize_hex_key(Path::new("/tmp/key"), raw).unwrap_err();
            match err {
                WatchtowerError::InvalidHexKey { path, .. } => {
                    assert_eq!(path, PathBuf::from("/tmp/key"))
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice");
        write_key_file(&path, KEY).unwrap();
        assert_eq!(read_key_file(&path).unwrap().as_str(), KEY);
    }

    #[cfg(unix)]
    #[test]
    fn write_sets_owner_only_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice");
        write_key_file(&path, KEY).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn missing_key_file_reports_key_not_found() {
        let dir = tempdir().unwrap();
        let err = read_key_file(&dir.path().join("ghost")).unwrap_err();
        assert!(matches!(err, WatchtowerError::KeyNotFound(_)));
    }

    #[test]
    fn ensure_directory_flags_file_collisions() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            ensure_directory(&file),
            Err(WatchtowerError::NotADirectory(_))
        ));
        ensure_directory(&dir.path().join("fresh/nested")).unwrap();
    }
}
