//! Keystore-file custody: each key is a password-encrypted JSON file.
//!
//! The file carries a PBKDF2-SHA256 derived key and a ChaCha20-Poly1305
//! sealed payload, next to the checksummed address so listings and
//! mismatched passwords can be checked without guessing.

use crate::backend::{
    format_file_time, resolve_key_name, CreatedKey, ExportedKey, KeyBackend, KeyRecord,
};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};
use watchtower_core::context::KEYSTORE_SUFFIX;
use watchtower_core::keyfile;
use watchtower_core::password::{allow_key_overwrite, PasswordGate};
use watchtower_core::{
    EcdsaKey, KeyStoreContext, SecretPrompt, WatchtowerError, WatchtowerResult,
};
use zeroize::Zeroizing;

const KDF_NAME: &str = "pbkdf2-sha256";
const CIPHER_NAME: &str = "chacha20poly1305";
const KDF_ITERATIONS: u32 = 250_000;
const DERIVED_KEY_LEN: u32 = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const FILE_VERSION: u32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    address: String,
    crypto: CryptoSection,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CryptoSection {
    cipher: String,
    ciphertext: String,
    nonce: String,
    kdf: String,
    kdfparams: KdfParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfParams {
    c: u32,
    dklen: u32,
    salt: String,
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut derived = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, derived.as_mut());
    derived
}

fn seal_key(key: &EcdsaKey, password: &str) -> WatchtowerResult<KeystoreFile> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let derived = derive_key(password, &salt, KDF_ITERATIONS);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_ref()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), key.to_bytes().as_slice())
        .map_err(|_| WatchtowerError::Keystore("sealing the key failed".into()))?;

    Ok(KeystoreFile {
        address: key.address().to_checksum_string(),
        crypto: CryptoSection {
            cipher: CIPHER_NAME.into(),
            ciphertext: hex::encode(ciphertext),
            nonce: hex::encode(nonce),
            kdf: KDF_NAME.into(),
            kdfparams: KdfParams {
                c: KDF_ITERATIONS,
                dklen: DERIVED_KEY_LEN,
                salt: hex::encode(salt),
            },
        },
        version: FILE_VERSION,
    })
}

fn open_key(file: &KeystoreFile, password: &str) -> WatchtowerResult<EcdsaKey> {
    if file.crypto.kdf != KDF_NAME || file.crypto.cipher != CIPHER_NAME {
        return Err(WatchtowerError::Keystore(format!(
            "unsupported keystore scheme {}/{}",
            file.crypto.kdf, file.crypto.cipher
        )));
    }

    let salt = hex::decode(&file.crypto.kdfparams.salt)
        .map_err(|err| WatchtowerError::Keystore(format!("malformed salt: {err}")))?;
    let nonce = hex::decode(&file.crypto.nonce)
        .map_err(|err| WatchtowerError::Keystore(format!("malformed nonce: {err}")))?;
    let ciphertext = hex::decode(&file.crypto.ciphertext)
        .map_err(|err| WatchtowerError::Keystore(format!("malformed ciphertext: {err}")))?;

    let derived = derive_key(password, &salt, file.crypto.kdfparams.c);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_ref()));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| {
                WatchtowerError::Keystore("invalid password or corrupted keystore file".into())
            })?,
    );

    let key = EcdsaKey::from_bytes(&plaintext)?;
    if !key
        .address()
        .to_checksum_string()
        .eq_ignore_ascii_case(&file.address)
    {
        return Err(WatchtowerError::Keystore(
            "keystore address does not match the decrypted key".into(),
        ));
    }
    Ok(key)
}

fn read_keystore_file(path: &Path) -> WatchtowerResult<KeystoreFile> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(WatchtowerError::KeyNotFound(path.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    Ok(serde_json::from_str(&data)?)
}

pub struct KeystoreBackend<P: SecretPrompt> {
    ctx: KeyStoreContext,
    gate: PasswordGate,
    prompt: P,
}

impl<P: SecretPrompt> KeystoreBackend<P> {
    pub fn new(ctx: KeyStoreContext, prompt: P) -> Self {
        Self {
            ctx,
            gate: PasswordGate::new(),
            prompt,
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.ctx.keystore_key_file(self.ctx.leaf_name(key))
    }

    fn store_new_key(
        &mut self,
        name: &str,
        key: EcdsaKey,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let path = self.key_path(name);
        if !allow_key_overwrite(&mut self.prompt, &path)? {
            log::info!("keeping existing keystore file at {}", path.display());
            return Ok(None);
        }

        let password = self
            .gate
            .obtain(&mut self.prompt, "encrypt the new key", insecure)?;
        let file = seal_key(&key, &password)?;
        keyfile::write_key_file(&path, &serde_json::to_string_pretty(&file)?)?;
        Ok(Some(CreatedKey {
            name: name.to_string(),
            address: key.address(),
            path,
        }))
    }

    fn open_named_key(&mut self, key: &str) -> WatchtowerResult<EcdsaKey> {
        let file = read_keystore_file(&self.key_path(key))?;
        let password = self
            .gate
            .obtain(&mut self.prompt, "decrypt the keystore", true)?;
        open_key(&file, &password)
    }
}

impl<P: SecretPrompt> KeyBackend for KeystoreBackend<P> {
    fn init(&mut self, _insecure: bool) -> WatchtowerResult<()> {
        keyfile::ensure_directory(self.ctx.keystore_dir())
    }

    fn create(
        &mut self,
        name: Option<&str>,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let key = EcdsaKey::random();
        let name = resolve_key_name(name, &key)?;
        self.store_new_key(&name, key, insecure)
    }

    fn import(
        &mut self,
        name: Option<&str>,
        private_key: &str,
        insecure: bool,
    ) -> WatchtowerResult<Option<CreatedKey>> {
        let key = EcdsaKey::from_hex(private_key)?;
        let name = resolve_key_name(name, &key)?;
        self.store_new_key(&name, key, insecure)
    }

    fn export(&mut self, name: &str) -> WatchtowerResult<ExportedKey> {
        let key = self.open_named_key(name)?;
        Ok(ExportedKey {
            address: key.address(),
            private_key_hex: key.to_hex(),
        })
    }

    fn delete(&mut self, name: &str) -> WatchtowerResult<PathBuf> {
        let path = self.key_path(name);
        if !path.is_file() {
            return Err(WatchtowerError::KeyNotFound(path));
        }
        fs::remove_file(&path)?;
        Ok(path)
    }

    fn list(&mut self) -> WatchtowerResult<Vec<KeyRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.ctx.keystore_dir())? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let name = file_name
                .strip_suffix(KEYSTORE_SUFFIX)
                .unwrap_or(&file_name)
                .to_string();
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
        Ok(self.open_named_key(key)?.to_hex())
    }

    // Keystore files are opened per operation; there is no store-wide lock.
    fn ensure_unlocked(&mut self) -> WatchtowerResult<()> {
        Ok(())
    }

    fn release(&mut self) -> WatchtowerResult<()> {
        Ok(())
    }
}
