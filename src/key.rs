//! PlayReady content key derivation.
//!
//! A content key is derived from a key seed shared with the license server
//! and the key id of the asset:
//!
//! ```text
//! A = SHA256(seed[..30] | kid)
//! B = SHA256(seed[..30] | kid | seed[..30])
//! C = SHA256(seed[..30] | kid | seed[..30] | kid)
//! key[i] = A[i] ^ A[i + 16] ^ B[i] ^ B[i + 16] ^ C[i] ^ C[i + 16]
//! ```
//!
//! `kid` is the GUID in its little-endian byte layout, the layout PlayReady
//! uses everywhere it serializes key ids.
use std::fmt;

use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Number of significant key seed bytes.
pub const KEY_SEED_LEN: usize = 30;

/// Content key size (AES-128).
pub const CONTENT_KEY_LEN: usize = 16;

/// Key seed shared between a license server and the packager.
#[derive(Clone)]
pub struct KeySeed(Vec<u8>);

impl KeySeed {
    /// Wrap raw seed bytes. Fails if fewer than 30 bytes are supplied.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < KEY_SEED_LEN {
            return Err(Error::InvalidKeySeed(format!(
                "expected at least {} bytes, got {}",
                KEY_SEED_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Decode a base64 key seed.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data_b64.trim())
            .map_err(|e| Error::InvalidKeySeed(format!("base64 decode failed: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// The significant part of the seed.
    pub fn truncated(&self) -> &[u8] {
        &self.0[..KEY_SEED_LEN]
    }

    /// Derive the content key for `key_id` from this seed.
    pub fn derive(&self, key_id: &Uuid) -> ContentKey {
        derive_from_seed(self.truncated(), key_id)
    }
}

impl fmt::Debug for KeySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySeed({} bytes)", self.0.len())
    }
}

/// Parse a key identifier from GUID text.
///
/// Accepts hyphenated, simple, braced and `urn:uuid:` forms.
pub fn parse_key_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim())
        .map_err(|e| Error::InvalidKeyIdentifier(format!("'{}': {}", input, e)))
}

/// A derived 128-bit content key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.0
    }

    /// Uppercase hex, two characters per byte, no separators.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl From<[u8; CONTENT_KEY_LEN]> for ContentKey {
    fn from(bytes: [u8; CONTENT_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Derive the content key for `key_id` from raw key seed bytes.
///
/// Only the first 30 bytes of the seed are used. Seeds shorter than that are
/// rejected with [`Error::InvalidKeySeed`].
pub fn derive_content_key(key_seed: &[u8], key_id: &Uuid) -> Result<ContentKey> {
    if key_seed.len() < KEY_SEED_LEN {
        return Err(Error::InvalidKeySeed(format!(
            "expected at least {} bytes, got {}",
            KEY_SEED_LEN,
            key_seed.len()
        )));
    }
    Ok(derive_from_seed(&key_seed[..KEY_SEED_LEN], key_id))
}

fn derive_from_seed(seed: &[u8], key_id: &Uuid) -> ContentKey {
    let kid = key_id.to_bytes_le();

    let sha_a = Sha256::new().chain_update(seed).chain_update(kid).finalize();
    let sha_b = Sha256::new()
        .chain_update(seed)
        .chain_update(kid)
        .chain_update(seed)
        .finalize();
    let sha_c = Sha256::new()
        .chain_update(seed)
        .chain_update(kid)
        .chain_update(seed)
        .chain_update(kid)
        .finalize();

    let mut key = [0u8; CONTENT_KEY_LEN];
    for (i, b) in key.iter_mut().enumerate() {
        let j = i + CONTENT_KEY_LEN;
        *b = sha_a[i] ^ sha_a[j] ^ sha_b[i] ^ sha_b[j] ^ sha_c[i] ^ sha_c[j];
    }
    ContentKey(key)
}
