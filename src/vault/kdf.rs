//! Password-to-key derivation (Argon2id) and key verification hashes.

use crate::config::VaultConfig;
use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const ARGON2ID: &str = "argon2id";

/// Parameters persisted next to the key hash so the key can be re-derived
/// even if the defaults change later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgonParameters {
    pub version: u32,
    pub variant: String,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_length: u32,
    pub key_length: u32,
}

impl From<&VaultConfig> for ArgonParameters {
    fn from(config: &VaultConfig) -> Self {
        Self {
            version: Version::V0x13 as u32,
            variant: ARGON2ID.to_string(),
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
            salt_length: config.salt_length,
            key_length: config.key_length,
        }
    }
}

impl Default for ArgonParameters {
    fn default() -> Self {
        Self::from(&VaultConfig::default())
    }
}

impl ArgonParameters {
    fn hasher(&self) -> Result<Argon2<'static>> {
        if self.variant != ARGON2ID {
            return Err(anyhow!("Unsupported Argon2 variant: {}", self.variant));
        }
        let version = Version::try_from(self.version)
            .map_err(|e| anyhow!("Unsupported Argon2 version {}: {}", self.version, e))?;
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(self.key_length as usize),
        )
        .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;
        Ok(Argon2::new(Algorithm::Argon2id, version, params))
    }
}

/// Random salt of `params.salt_length` bytes.
pub fn generate_salt(params: &ArgonParameters) -> Vec<u8> {
    let mut salt = vec![0u8; params.salt_length as usize];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives a key from `password` and `salt`.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    params: &ArgonParameters,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; params.key_length as usize]);
    params
        .hasher()?
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
    Ok(key)
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Constant-time check of `key` against a stored SHA-256 hash.
pub fn key_matches(key: &[u8], expected_hash: &[u8]) -> bool {
    sha256(key).ct_eq(expected_hash).into()
}
