//! AES-256-GCM sealing of individual secrets.
//!
//! Output layout is `nonce || ciphertext+tag`, base64-encoded for storage in
//! TEXT columns. Every call draws a fresh 96-bit nonce.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Encrypts `plaintext` under `key`, returning base64(nonce || ciphertext).
pub fn seal(plaintext: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(BASE64.encode(out))
}

/// Reverses [`seal`]. Fails on a wrong key, truncation or tampering.
pub fn open(ciphertext: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    let raw = BASE64
        .decode(ciphertext)
        .context("Failed to decode ciphertext")?;
    if raw.len() < NONCE_SIZE {
        return Err(anyhow!(
            "Ciphertext too short: expected at least {} bytes, got {}",
            NONCE_SIZE,
            raw.len()
        ));
    }

    let (nonce, body) = raw.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes, got {}",
            KEY_SIZE,
            key.len()
        ));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}
