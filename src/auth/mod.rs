//! Vault lifecycle commands: first-run setup, unlock and lock.

use crate::context::AppContext;
use crate::error::AppResult;
use crate::vault::Vault;
use std::sync::Arc;
use tracing::info;


pub struct AuthController {
    vault: Arc<Vault>,
}

impl AuthController {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    pub fn is_vault_configured(&self, ctx: &AppContext) -> AppResult<bool> {
        self.vault.is_configured(ctx)
    }

    /// Sets the master password on first run. The vault is left unlocked.
    pub async fn configure_vault(&self, ctx: &AppContext, password: &str) -> AppResult<()> {
        info!("Configuring vault with a master password");
        self.vault.configure(ctx, password).await
    }

    /// Returns `false` when the password does not match.
    pub async fn unlock(&self, ctx: &AppContext, password: &str) -> AppResult<bool> {
        info!("Unlocking vault");
        self.vault.open(ctx, password).await
    }

    /// Purges the key from memory.
    pub fn lock(&self) {
        info!("Locking vault");
        self.vault.seal();
    }

    pub fn is_unlocked(&self) -> bool {
        self.vault.is_open()
    }
}
