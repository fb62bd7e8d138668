//! secp256k1 key material and the signing capability handed to callers.
//!
//! Resolved plaintext keys become an [`EcdsaKey`]; the registration glue only
//! ever sees `address()` and `sign_digest()`.

use crate::error::{WatchtowerError, WatchtowerResult};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// 20-byte Ethereum address, rendered EIP-55 checksummed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address([u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Checksummed hex per EIP-55: a nibble of the keccak hash of the
    /// lowercase address decides the casing of each letter.
    pub fn to_checksum_string(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_string())
    }
}

/// A secp256k1 private key plus its derived identity.
#[derive(Clone)]
pub struct EcdsaKey {
    signing: SigningKey,
}

impl fmt::Debug for EcdsaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdsaKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl EcdsaKey {
    /// Generate a fresh key from the OS RNG.
    pub fn random() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    /// Parse 64 hex digits (optionally `0x`-prefixed) into a key.
    pub fn from_hex(hex_key: &str) -> WatchtowerResult<Self> {
        let normalized = crate::keyfile::normalize_hex_key(Path::new("<memory>"), hex_key)?;
        let bytes = Zeroizing::new(hex::decode(normalized.as_str()).map_err(|err| {
            WatchtowerError::Keystore(format!("hex decode failed: {err}"))
        })?);
        let signing = SigningKey::from_slice(&bytes)
            .map_err(|err| WatchtowerError::Keystore(format!("invalid secp256k1 key: {err}")))?;
        Ok(Self { signing })
    }

    /// Construct from raw 32-byte scalar material.
    pub fn from_bytes(bytes: &[u8]) -> WatchtowerResult<Self> {
        let signing = SigningKey::from_slice(bytes)
            .map_err(|err| WatchtowerError::Keystore(format!("invalid secp256k1 key: {err}")))?;
        Ok(Self { signing })
    }

    /// The key as 64 lowercase hex digits (no prefix).
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    /// Raw 32-byte scalar.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes().into())
    }

    /// Derived Ethereum address: keccak of the uncompressed public key body,
    /// last 20 bytes.
    pub fn address(&self) -> Address {
        let point = self.signing.verifying_key().to_encoded_point(false);
        let hash = Keccak256::digest(&point.as_bytes()[1..]);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..]);
        Address(addr)
    }

    /// Sign a 32-byte digest, returning the 65-byte `r || s || v` signature
    /// (v in the 27/28 convention).
    pub fn sign_digest(&self, digest: &[u8; 32]) -> WatchtowerResult<[u8; 65]> {
        let (signature, recovery): (Signature, RecoveryId) = self
            .signing
            .sign_prehash_recoverable(digest)
            .map_err(|err| WatchtowerError::Keystore(format!("signing failed: {err}")))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery.to_byte();
        Ok(out)
    }
}

/// Recover the signer address from a digest and a 65-byte signature.
pub fn recover_address(digest: &[u8; 32], signature: &[u8; 65]) -> WatchtowerResult<Address> {
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|err| WatchtowerError::Keystore(format!("malformed signature: {err}")))?;
    let recovery = RecoveryId::from_byte(signature[64].wrapping_sub(27))
        .ok_or_else(|| WatchtowerError::Keystore("malformed recovery id".into()))?;
    let verifying = VerifyingKey::recover_from_prehash(digest, &sig, recovery)
        .map_err(|err| WatchtowerError::Keystore(format!("recovery failed: {err}")))?;

    let point = verifying.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Ok(Address(addr))
}
