//! Password-gated local secret vault.
//!
//! The vault derives a symmetric key from the master password with Argon2id
//! and keeps it only in memory (the "enclave"). A SHA-256 hash of the key
//! plus the derivation parameters are persisted in `argon_key_material` so
//! the password can be verified on later runs.
//!
//! States: uninitialized, configured+sealed, configured+open. Sealing is
//! always legal and wipes the key.

pub mod cipher;
pub mod kdf;

use crate::clock::Clock;
use crate::context::AppContext;
use crate::db::Database;
use crate::error::{AppError, AppResult, ErrorCode, OrFatal};
use crate::ids::new_instance_id;
use base64::{engine::general_purpose::STANDARD_NO_PAD as BASE64, Engine};
use kdf::ArgonParameters;
use rusqlite::{params, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Encrypt/decrypt service consumed by the controllers.
pub trait EncryptionService: Send + Sync {
    /// Encrypts with the current key.
    ///
    /// # Returns
    /// * `Ok((ciphertext, key_id))` - Base64 ciphertext and the key generation used
    /// * `Err` - `VAULT_SEALED` while locked
    fn encrypt(&self, plaintext: &str) -> AppResult<(String, String)>;

    /// # Arguments
    /// * `ciphertext` - Output of [`EncryptionService::encrypt`]
    /// * `key_id` - Key generation recorded next to the ciphertext
    fn decrypt(&self, ciphertext: &str, key_id: &str) -> AppResult<String>;
}

struct Enclave {
    key_id: String,
    key: Zeroizing<Vec<u8>>,
}

struct KeyMaterial {
    key_id: String,
    key_hash: Vec<u8>,
    salt_base64: String,
    params: ArgonParameters,
}

pub struct Vault {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    params: ArgonParameters,
    enclave: Mutex<Option<Enclave>>,
}

impl Vault {
    /// `params` are only used by [`Vault::configure`].
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, params: ArgonParameters) -> Self {
        Self {
            db,
            clock,
            params,
            enclave: Mutex::new(None),
        }
    }

    pub fn is_configured(&self, ctx: &AppContext) -> AppResult<bool> {
        ctx.check()?;
        Ok(self.load_key_material()?.is_some())
    }

    pub fn is_open(&self) -> bool {
        self.enclave.lock().unwrap().is_some()
    }

    /// First-run setup: derives the key, stores its hash and leaves the
    /// vault open.
    ///
    /// # Arguments
    /// * `password` - Master password; only its derived key's hash is stored
    ///
    /// # Returns
    /// * `Ok(())` - Vault configured and open
    /// * `Err` - `VAULT_ALREADY_CONFIGURED` on a second call
    pub async fn configure(&self, ctx: &AppContext, password: &str) -> AppResult<()> {
        if self.is_configured(ctx)? {
            return Err(ErrorCode::VaultAlreadyConfigured.into());
        }

        let params = self.params.clone();
        let salt = kdf::generate_salt(&params);
        let key = derive_blocking(ctx, password, salt.clone(), params.clone()).await?;
        if key.len() != cipher::KEY_SIZE {
            return Err(AppError::fatal(anyhow::anyhow!(
                "Configured key length {} does not match cipher key size {}",
                key.len(),
                cipher::KEY_SIZE
            )));
        }

        let key_id = new_instance_id(self.clock.now_unix());

        ctx.check()?;
        self.db
            .conn()
            .execute(
                r#"
                INSERT INTO argon_key_material (
                    key_id, key_hash_sha256, argon2_version, argon2_variant,
                    memory, iterations, parallelism, salt_length, salt_base64,
                    key_length, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    key_id,
                    kdf::sha256(&key),
                    params.version,
                    params.variant,
                    params.memory_kib,
                    params.iterations,
                    params.parallelism,
                    params.salt_length,
                    BASE64.encode(&salt),
                    params.key_length,
                    self.clock.now_unix(),
                ],
            )
            .or_fatal("Failed to store vault key material")?;

        info!(key_id = %key_id, "Vault configured");
        *self.enclave.lock().unwrap() = Some(Enclave { key_id, key });
        Ok(())
    }

    /// Unlocks the vault.
    ///
    /// # Returns
    /// * `Ok(true)` - Key derived and held in memory (also if already open)
    /// * `Ok(false)` - Wrong password
    /// * `Err` - `VAULT_NOT_CONFIGURED` before first-run setup
    pub async fn open(&self, ctx: &AppContext, password: &str) -> AppResult<bool> {
        if self.is_open() {
            return Ok(true);
        }

        ctx.check()?;
        let material = self
            .load_key_material()?
            .ok_or(ErrorCode::VaultNotConfigured)?;

        let salt = BASE64
            .decode(&material.salt_base64)
            .or_fatal("Stored vault salt is not valid base64")?;
        let key = derive_blocking(ctx, password, salt, material.params).await?;

        if !kdf::key_matches(&key, &material.key_hash) {
            warn!("Vault unlock rejected");
            return Ok(false);
        }

        let mut enclave = self.enclave.lock().unwrap();
        if enclave.is_none() {
            *enclave = Some(Enclave {
                key_id: material.key_id,
                key,
            });
        }
        info!("Vault opened");
        Ok(true)
    }

    /// Wipes the in-memory key. Idempotent.
    pub fn seal(&self) {
        if self.enclave.lock().unwrap().take().is_some() {
            info!("Vault sealed");
        }
    }

    fn load_key_material(&self) -> AppResult<Option<KeyMaterial>> {
        self.db
            .conn()
            .query_row(
                r#"
                SELECT key_id, key_hash_sha256, argon2_version, argon2_variant,
                       memory, iterations, parallelism, salt_length, salt_base64,
                       key_length
                FROM argon_key_material
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok(KeyMaterial {
                        key_id: row.get(0)?,
                        key_hash: row.get(1)?,
                        salt_base64: row.get(8)?,
                        params: ArgonParameters {
                            version: row.get(2)?,
                            variant: row.get(3)?,
                            memory_kib: row.get(4)?,
                            iterations: row.get(5)?,
                            parallelism: row.get(6)?,
                            salt_length: row.get(7)?,
                            key_length: row.get(9)?,
                        },
                    })
                },
            )
            .optional()
            .or_fatal("Failed to read vault key material")
    }
}

impl EncryptionService for Vault {
    fn encrypt(&self, plaintext: &str) -> AppResult<(String, String)> {
        let guard = self.enclave.lock().unwrap();
        let enclave = guard.as_ref().ok_or(ErrorCode::VaultSealed)?;
        let ciphertext = cipher::seal(plaintext, &enclave.key).or_fatal("Encryption failed")?;
        Ok((ciphertext, enclave.key_id.clone()))
    }

    fn decrypt(&self, ciphertext: &str, key_id: &str) -> AppResult<String> {
        let guard = self.enclave.lock().unwrap();
        let enclave = guard.as_ref().ok_or(ErrorCode::VaultSealed)?;
        // Only the current key generation is held in memory
        if enclave.key_id != key_id {
            return Err(ErrorCode::VaultSealed.into());
        }
        cipher::open(ciphertext, &enclave.key).or_fatal("Decryption failed")
    }
}

/// Runs the (memory-hard) derivation on the blocking pool.
async fn derive_blocking(
    ctx: &AppContext,
    password: &str,
    salt: Vec<u8>,
    params: ArgonParameters,
) -> AppResult<Zeroizing<Vec<u8>>> {
    let password = Zeroizing::new(password.to_string());
    let task = tokio::task::spawn_blocking(move || kdf::derive_key(&password, &salt, &params));
    ctx.run(task)
        .await?
        .or_fatal("Key derivation task failed")?
        .or_fatal("Failed to derive vault key")
}
