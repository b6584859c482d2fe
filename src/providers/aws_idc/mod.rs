//! AWS IAM Identity Center provider.
//!
//! An instance links one Identity Center tenant (start URL + region) to an
//! encrypted token set. Instances are created and refreshed through a
//! two-phase device authorization: the first phase returns the user code,
//! the UI calls the finalize phase once the user has authorized. No state
//! is kept between the two phases beyond the per-region OIDC client
//! registration.
//!
//! Account listings are cached in memory for the remaining lifetime of the
//! access token. An expired token is discovered lazily on read.

mod cache;
mod types;

#[cfg(test)]
mod tests;

pub use cache::AccountCache;
pub use types::*;

use crate::aws_sso::{
    regions, AwsAccount, AwsSsoClient, RegistrationResponse, RoleCredentials, SsoError,
    TokenResponse,
};
use crate::clipboard::Clipboard;
use crate::clock::Clock;
use crate::context::AppContext;
use crate::db::Database;
use crate::error::{AppError, AppResult, ErrorCode, OrFatal};
use crate::eventing::{EventBus, EventMeta};
use crate::favorites::{Favorite, FavoritesRepo};
use crate::humanize::relative_time;
use crate::ids::{new_instance_id, random_string};
use crate::plumbing::{AwsCredentials, Plumber, SinkInstance};
use crate::sinks::aws_credentials_file::{validate_profile_name, writer};
use crate::vault::EncryptionService;
use rusqlite::{params, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const PROVIDER_CODE: &str = "aws-idc";
pub const PROVIDER_NAME: &str = "AWS Identity Center";

/// `source_type` of every event this provider publishes.
pub const EVENT_SOURCE: &str = "AwsIdc";

const INSTANCE_VERSION: u32 = 1;
const MAX_LABEL_LEN: usize = 50;
const CLIENT_NAME_SUFFIX_LEN: usize = 6;
const DEFAULT_CLIENT_NAME_PREFIX: &str = "credflow";
const DEFAULT_CACHE_ENTRIES: usize = 256;
const STALE_TOKEN: &str = "stale";

struct StoredInstance {
    region: String,
    label: String,
    access_token_enc: String,
    access_token_created_at: i64,
    access_token_expires_in: i64,
    enc_key_id: String,
}

impl StoredInstance {
    fn expires_at(&self) -> i64 {
        self.access_token_created_at + self.access_token_expires_in
    }

    /// A zero lifetime marks a token the portal has already rejected.
    fn is_expired(&self, now: i64) -> bool {
        self.access_token_expires_in <= 0 || now > self.expires_at()
    }
}

struct StoredRegistration {
    client_id: String,
    client_secret_enc: String,
    created_at: i64,
    expires_at: i64,
    enc_key_id: String,
}

struct EncryptedTokens {
    id_token: String,
    access_token: String,
    refresh_token: String,
    key_id: String,
}

pub struct AwsIdcController {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    favorites: Arc<FavoritesRepo>,
    encryption: Arc<dyn EncryptionService>,
    sso: Arc<dyn AwsSsoClient>,
    clipboard: Arc<dyn Clipboard>,
    clock: Arc<dyn Clock>,
    cache: AccountCache,
    client_name_prefix: String,
    credentials_file: Option<PathBuf>,
    plumbers: Vec<Arc<dyn Plumber<AwsCredentials>>>,
}

fn validate_start_url(start_url: &str) -> AppResult<()> {
    match url::Url::parse(start_url) {
        Ok(url) if url.has_host() => Ok(()),
        _ => Err(ErrorCode::InvalidStartUrl.into()),
    }
}

fn validate_region(region: &str) -> AppResult<()> {
    if !regions::is_supported(region) {
        return Err(ErrorCode::InvalidAwsRegion.into());
    }
    Ok(())
}

fn validate_label(label: &str) -> AppResult<()> {
    let len = label.chars().count();
    if len < 1 || len > MAX_LABEL_LEN {
        return Err(ErrorCode::InvalidLabel.into());
    }
    Ok(())
}

/// Shell statements exporting the credentials, PowerShell or POSIX.
pub fn format_exports(creds: &RoleCredentials, windows: bool) -> String {
    let prefix = if windows { "$Env:" } else { "export " };
    format!(
        "{p}AWS_ACCESS_KEY_ID=\"{}\"\n{p}AWS_SECRET_ACCESS_KEY=\"{}\"\n{p}AWS_SESSION_TOKEN=\"{}\"",
        creds.access_key_id,
        creds.secret_access_key,
        creds.session_token,
        p = prefix
    )
}

fn to_accounts(accounts: Vec<AwsAccount>) -> Vec<Account> {
    accounts
        .into_iter()
        .map(|account| Account {
            account_id: account.account_id,
            account_name: account.account_name,
            roles: account
                .roles
                .into_iter()
                .map(|role_name| AccountRole { role_name })
                .collect(),
        })
        .collect()
}

impl AwsIdcController {
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        favorites: Arc<FavoritesRepo>,
        encryption: Arc<dyn EncryptionService>,
        sso: Arc<dyn AwsSsoClient>,
        clipboard: Arc<dyn Clipboard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            bus,
            favorites,
            encryption,
            sso,
            clipboard,
            cache: AccountCache::new(clock.clone(), DEFAULT_CACHE_ENTRIES),
            clock,
            client_name_prefix: DEFAULT_CLIENT_NAME_PREFIX.to_string(),
            credentials_file: None,
            plumbers: Vec::new(),
        }
    }

    /// Prefix of the friendly name sent when registering OIDC clients.
    pub fn with_client_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_name_prefix = prefix.into();
        self
    }

    pub fn with_cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache = AccountCache::new(self.clock.clone(), max_entries);
        self
    }

    /// Target of `save_role_credentials`; defaults to the shared credentials file.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    pub fn add_plumbers<I>(&mut self, plumbers: I)
    where
        I: IntoIterator<Item = Arc<dyn Plumber<AwsCredentials>>>,
    {
        self.plumbers.extend(plumbers);
    }

    /// Instance ids, newest first.
    pub fn list_instances(&self, ctx: &AppContext) -> AppResult<Vec<String>> {
        ctx.check()?;
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT instance_id FROM aws_idc ORDER BY instance_id DESC")
            .or_fatal("Failed to prepare instance list query")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .or_fatal("Failed to list instances")?
            .collect::<Result<Vec<_>, _>>()
            .or_fatal("Failed to read instance row")?;
        Ok(ids)
    }

    /// Builds the dashboard card for an instance.
    ///
    /// # Arguments
    /// * `instance_id` - Instance to describe
    /// * `force_refresh` - Skip the account cache and query the portal
    ///
    /// # Returns
    /// * `Ok(InstanceCard)` - With no accounts when the access token has expired
    /// * `Err` - `INSTANCE_WAS_NOT_FOUND`, `VAULT_SEALED` or a transient portal error
    pub async fn get_instance_data(
        &self,
        ctx: &AppContext,
        instance_id: &str,
        force_refresh: bool,
    ) -> AppResult<InstanceCard> {
        let instance = self.load_instance(ctx, instance_id)?;
        let is_favorite = self
            .favorites
            .is_favorite(ctx, &Favorite::new(PROVIDER_CODE, instance_id))?;
        let sinks = self.connected_sinks(ctx, instance_id).await?;

        let card = |expired: bool, expires_in: String, accounts: Vec<Account>| InstanceCard {
            instance_id: instance_id.to_string(),
            enabled: true,
            label: instance.label.clone(),
            is_favorite,
            is_access_token_expired: expired,
            access_token_expires_in: expires_in,
            accounts,
            sinks: sinks.clone(),
        };

        let now = self.clock.now_unix();
        let expires_in = relative_time(instance.expires_at(), now);
        if instance.is_expired(now) {
            info!(instance_id = %instance_id, "Access token has expired");
            return Ok(card(true, expires_in, Vec::new()));
        }

        if !force_refresh {
            if let Some(bytes) = self.cache.get(instance_id) {
                debug!(instance_id = %instance_id, "Account cache hit");
                let accounts: Vec<Account> =
                    serde_json::from_slice(&bytes).or_fatal("Failed to decode cached accounts")?;
                return Ok(card(false, expires_in, accounts));
            }
        }

        let access_token = self
            .encryption
            .decrypt(&instance.access_token_enc, &instance.enc_key_id)?;

        debug!(instance_id = %instance_id, force_refresh, "Fetching accounts");
        let listed = ctx
            .run(self.sso.list_accounts(&instance.region, &access_token))
            .await?;
        let accounts = match listed {
            Ok(accounts) => to_accounts(accounts),
            Err(SsoError::AccessTokenExpired) => {
                debug!(instance_id = %instance_id, "Portal rejected access token");
                self.invalidate_stale_access_token(ctx, instance_id)?;
                return Ok(card(true, STALE_TOKEN.to_string(), Vec::new()));
            }
            Err(err) => {
                error!(instance_id = %instance_id, error = %err, "Failed to list accounts");
                return Err(ErrorCode::TransientAwsClientError.into());
            }
        };

        let bytes = serde_json::to_vec(&accounts).or_fatal("Failed to encode accounts")?;
        self.cache
            .set(instance_id, bytes, instance.expires_at() - now);

        Ok(card(false, expires_in, accounts))
    }

    /// Exchanges the stored access token for short-lived role credentials.
    ///
    /// # Returns
    /// * `Ok(RoleCredentials)` - Credentials as issued by the portal
    /// * `Err` - `STALE_AWS_ACCESS_TOKEN` once the portal rejects the token; the
    ///   stored token is marked expired as a side effect
    pub async fn get_role_credentials(
        &self,
        ctx: &AppContext,
        input: &RoleInput,
    ) -> AppResult<RoleCredentials> {
        let instance = self.load_instance(ctx, &input.instance_id)?;
        let access_token = self
            .encryption
            .decrypt(&instance.access_token_enc, &instance.enc_key_id)?;

        let fetched = ctx
            .run(self.sso.get_role_credentials(
                &instance.region,
                &input.account_id,
                &input.role_name,
                &access_token,
            ))
            .await?;

        match fetched {
            Ok(creds) => {
                info!(
                    instance_id = %input.instance_id,
                    account_id = %input.account_id,
                    role = %input.role_name,
                    "Role credentials issued"
                );
                Ok(creds)
            }
            Err(SsoError::AccessTokenExpired) => {
                debug!(instance_id = %input.instance_id, "Portal rejected access token");
                self.invalidate_stale_access_token(ctx, &input.instance_id)?;
                Err(ErrorCode::StaleAwsAccessToken.into())
            }
            Err(err) => {
                error!(instance_id = %input.instance_id, error = %err, "Failed to get role credentials");
                Err(ErrorCode::TransientAwsClientError.into())
            }
        }
    }

    /// Puts shell export statements for the role credentials on the clipboard.
    pub async fn copy_role_credentials(&self, ctx: &AppContext, input: &RoleInput) -> AppResult<()> {
        let creds = self.get_role_credentials(ctx, input).await?;
        let exports = format_exports(&creds, cfg!(windows));
        self.clipboard.write_text(ctx, &exports).await
    }

    /// Writes the role credentials into `aws_profile` of the shared
    /// credentials file.
    pub async fn save_role_credentials(
        &self,
        ctx: &AppContext,
        input: SaveRoleCredentialsInput,
    ) -> AppResult<()> {
        let profile = validate_profile_name(&input.aws_profile)?.to_string();
        let path = match &self.credentials_file {
            Some(path) => path.clone(),
            None => writer::default_credentials_path()?,
        };

        let role = RoleInput {
            instance_id: input.instance_id,
            account_id: input.account_id,
            role_name: input.role_name,
        };
        let creds = self.get_role_credentials(ctx, &role).await?;
        let creds = AwsCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: Some(creds.session_token),
        };

        let target = path.clone();
        let profile_name = profile.clone();
        let write = tokio::task::spawn_blocking(move || {
            writer::write_profile_credentials(&target, &profile_name, &creds)
        });
        ctx.run(write)
            .await?
            .or_fatal("Credentials write task failed")??;

        info!(profile = %profile, path = %path.display(), "Role credentials saved");
        Ok(())
    }

    /// Fetches role credentials and hands them to a sink connected to the
    /// instance.
    pub async fn flow_credentials(
        &self,
        ctx: &AppContext,
        input: FlowCredentialsInput,
    ) -> AppResult<()> {
        let plumber = self
            .plumbers
            .iter()
            .find(|p| p.sink_code() == input.sink_code)
            .ok_or(ErrorCode::InstanceWasNotFound)?;

        let connected = plumber
            .list_connected_sinks(ctx, PROVIDER_CODE, &input.instance_id)
            .await?;
        if !connected.iter().any(|s| s.sink_id == input.sink_id) {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }

        let role = RoleInput {
            instance_id: input.instance_id,
            account_id: input.account_id,
            role_name: input.role_name,
        };
        let creds = self.get_role_credentials(ctx, &role).await?;
        let payload = AwsCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: Some(creds.session_token),
        };
        plumber.flow_data(ctx, &payload, &input.sink_id).await
    }

    /// Phase one of instance creation: registers (or reuses) the OIDC client
    /// for the region and starts device authorization.
    ///
    /// # Arguments
    /// * `input` - Start URL, region and label of the new instance
    ///
    /// # Returns
    /// * `Ok(AuthorizeDeviceFlowResult)` - Codes and verification URI to show the user
    /// * `Err` - `INSTANCE_ALREADY_REGISTERED` for a known start URL, or a
    ///   validation code for malformed input
    pub async fn setup(
        &self,
        ctx: &AppContext,
        input: SetupInput,
    ) -> AppResult<AuthorizeDeviceFlowResult> {
        validate_start_url(&input.start_url)?;
        validate_region(&input.aws_region)?;
        validate_label(&input.label)?;

        ctx.check()?;
        let exists: bool = self
            .db
            .conn()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM aws_idc WHERE start_url = ?1)",
                [&input.start_url],
                |row| row.get(0),
            )
            .or_fatal("Failed to check for existing instance")?;
        if exists {
            warn!(start_url = %input.start_url, "Instance already registered");
            return Err(ErrorCode::InstanceAlreadyRegistered.into());
        }

        let registration = self.get_or_register_client(ctx, &input.aws_region).await?;

        let authorized = ctx
            .run(self.sso.start_device_authorization(
                &input.aws_region,
                &input.start_url,
                &registration.client_id,
                &registration.client_secret,
            ))
            .await?;
        let authorization = match authorized {
            Ok(authorization) => authorization,
            Err(SsoError::InvalidRequest) => {
                debug!(start_url = %input.start_url, "Start URL rejected");
                return Err(ErrorCode::InvalidStartUrl.into());
            }
            Err(err) => {
                error!(error = %err, "Failed to start device authorization");
                return Err(ErrorCode::TransientAwsClientError.into());
            }
        };

        info!(
            region = %input.aws_region,
            expires_in = authorization.expires_in,
            "Device authorization started"
        );
        Ok(AuthorizeDeviceFlowResult {
            instance_id: None,
            start_url: input.start_url,
            region: input.aws_region,
            label: input.label,
            client_id: registration.client_id,
            verification_uri: authorization.verification_uri_complete,
            user_code: authorization.user_code,
            expires_in: authorization.expires_in,
            device_code: authorization.device_code,
        })
    }

    /// Phase two of instance creation. Returns the new instance id.
    pub async fn finalize_setup(
        &self,
        ctx: &AppContext,
        input: FinalizeSetupInput,
    ) -> AppResult<String> {
        validate_label(&input.label)?;
        validate_start_url(&input.start_url)?;
        validate_region(&input.aws_region)?;

        let registration = self
            .load_registration(ctx, &input.aws_region)?
            .ok_or(ErrorCode::DeviceAuthFlowNotAuthorized)?;
        let client_secret = self
            .encryption
            .decrypt(&registration.client_secret_enc, &registration.enc_key_id)?;

        let token = self
            .create_token(
                ctx,
                &input.aws_region,
                &input.client_id,
                &client_secret,
                &input.user_code,
                &input.device_code,
            )
            .await?;
        let encrypted = self.encrypt_tokens(&token)?;

        let now = self.clock.now_unix();
        let instance_id = new_instance_id(now);

        ctx.check()?;
        let continuation = {
            let mut conn = self.db.conn();
            let tx = conn
                .transaction()
                .or_fatal("Failed to begin instance transaction")?;

            let inserted = tx.execute(
                r#"
                INSERT INTO aws_idc (
                    instance_id, version, start_url, region, label, enabled,
                    id_token_enc, access_token_enc, token_type,
                    access_token_created_at, access_token_expires_in,
                    refresh_token_enc, enc_key_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    instance_id,
                    INSTANCE_VERSION,
                    input.start_url,
                    input.aws_region,
                    input.label,
                    encrypted.id_token,
                    encrypted.access_token,
                    token.token_type,
                    now,
                    token.expires_in,
                    encrypted.refresh_token,
                    encrypted.key_id,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    warn!(start_url = %input.start_url, "Instance registered concurrently");
                    return Err(ErrorCode::InstanceAlreadyRegistered.into());
                }
                Err(e) => return Err(e).or_fatal("Failed to insert instance"),
            }

            let continuation = self.bus.publish_tx(
                ctx,
                &AwsIdcInstanceCreated {
                    instance_id: instance_id.clone(),
                    start_url: input.start_url.clone(),
                    region: input.aws_region.clone(),
                    label: input.label.clone(),
                },
                EventMeta::new(INSTANCE_VERSION, EVENT_SOURCE, &instance_id),
                &tx,
            )?;

            tx.commit().or_fatal("Failed to commit instance")?;
            continuation
        };
        continuation.deliver();

        info!(instance_id = %instance_id, region = %input.aws_region, "Instance created");
        Ok(instance_id)
    }

    pub fn mark_as_favorite(&self, ctx: &AppContext, instance_id: &str) -> AppResult<()> {
        if !self.instance_exists(ctx, instance_id)? {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }
        self.favorites
            .add(ctx, &Favorite::new(PROVIDER_CODE, instance_id))
    }

    pub fn unmark_as_favorite(&self, ctx: &AppContext, instance_id: &str) -> AppResult<()> {
        let removed = self
            .favorites
            .remove(ctx, &Favorite::new(PROVIDER_CODE, instance_id))?;
        if !removed {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }
        Ok(())
    }

    /// Phase one of a token refresh, reusing the stored tenant details.
    pub async fn refresh_access_token(
        &self,
        ctx: &AppContext,
        instance_id: &str,
    ) -> AppResult<AuthorizeDeviceFlowResult> {
        ctx.check()?;
        let stored = self
            .db
            .conn()
            .query_row(
                "SELECT start_url, region, label FROM aws_idc WHERE instance_id = ?1",
                [instance_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .or_fatal("Failed to load instance")?;
        let Some((start_url, region, label)) = stored else {
            debug!(instance_id = %instance_id, "Instance not found");
            return Err(ErrorCode::InstanceWasNotFound.into());
        };

        let registration = self.get_or_register_client(ctx, &region).await?;

        let authorized = ctx
            .run(self.sso.start_device_authorization(
                &region,
                &start_url,
                &registration.client_id,
                &registration.client_secret,
            ))
            .await?;
        let authorization = authorized.map_err(|err| {
            error!(instance_id = %instance_id, error = %err, "Failed to start device authorization");
            AppError::from(ErrorCode::TransientAwsClientError)
        })?;

        Ok(AuthorizeDeviceFlowResult {
            instance_id: Some(instance_id.to_string()),
            start_url,
            region,
            label,
            client_id: registration.client_id,
            verification_uri: authorization.verification_uri_complete,
            user_code: authorization.user_code,
            expires_in: authorization.expires_in,
            device_code: authorization.device_code,
        })
    }

    /// Phase two of a token refresh: stores the new token set in place.
    ///
    /// # Arguments
    /// * `input` - Instance id plus the codes from `refresh_access_token`;
    ///   `region` must be the instance's own region
    ///
    /// # Returns
    /// * `Ok(())` - Tokens replaced and cached accounts dropped
    /// * `Err` - `INSTANCE_WAS_NOT_FOUND`, `INVALID_AWS_REGION`,
    ///   `DEVICE_AUTH_FLOW_NOT_AUTHORIZED` or a device flow error
    pub async fn finalize_refresh_access_token(
        &self,
        ctx: &AppContext,
        input: FinalizeRefreshInput,
    ) -> AppResult<()> {
        validate_region(&input.region)?;

        let instance = self.load_instance(ctx, &input.instance_id)?;
        if instance.region != input.region {
            return Err(ErrorCode::InvalidAwsRegion.into());
        }

        let registration = self
            .load_registration(ctx, &input.region)?
            .ok_or(ErrorCode::DeviceAuthFlowNotAuthorized)?;
        let client_secret = self
            .encryption
            .decrypt(&registration.client_secret_enc, &registration.enc_key_id)?;

        let token = self
            .create_token(
                ctx,
                &input.region,
                &registration.client_id,
                &client_secret,
                &input.user_code,
                &input.device_code,
            )
            .await?;
        let encrypted = self.encrypt_tokens(&token)?;

        ctx.check()?;
        let updated = self
            .db
            .conn()
            .execute(
                r#"
                UPDATE aws_idc SET
                    id_token_enc = ?1,
                    access_token_enc = ?2,
                    token_type = ?3,
                    access_token_created_at = ?4,
                    access_token_expires_in = ?5,
                    refresh_token_enc = ?6,
                    enc_key_id = ?7
                WHERE instance_id = ?8
                "#,
                params![
                    encrypted.id_token,
                    encrypted.access_token,
                    token.token_type,
                    self.clock.now_unix(),
                    token.expires_in,
                    encrypted.refresh_token,
                    encrypted.key_id,
                    input.instance_id,
                ],
            )
            .or_fatal("Failed to update instance tokens")?;
        if updated != 1 {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }

        self.cache.remove(&input.instance_id);
        info!(instance_id = %input.instance_id, "Access token refreshed");
        Ok(())
    }

    fn load_instance(&self, ctx: &AppContext, instance_id: &str) -> AppResult<StoredInstance> {
        ctx.check()?;
        self.db
            .conn()
            .query_row(
                r#"
                SELECT region, label, access_token_enc, access_token_created_at,
                       access_token_expires_in, enc_key_id
                FROM aws_idc
                WHERE instance_id = ?1
                "#,
                [instance_id],
                |row| {
                    Ok(StoredInstance {
                        region: row.get(0)?,
                        label: row.get(1)?,
                        access_token_enc: row.get(2)?,
                        access_token_created_at: row.get(3)?,
                        access_token_expires_in: row.get(4)?,
                        enc_key_id: row.get(5)?,
                    })
                },
            )
            .optional()
            .or_fatal("Failed to load instance")?
            .ok_or_else(|| ErrorCode::InstanceWasNotFound.into())
    }

    fn instance_exists(&self, ctx: &AppContext, instance_id: &str) -> AppResult<bool> {
        ctx.check()?;
        self.db
            .conn()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM aws_idc WHERE instance_id = ?1)",
                [instance_id],
                |row| row.get(0),
            )
            .or_fatal("Failed to check instance")
    }

    /// Drops cached accounts and marks the stored token as expired.
    fn invalidate_stale_access_token(&self, ctx: &AppContext, instance_id: &str) -> AppResult<()> {
        self.cache.remove(instance_id);
        ctx.check()?;
        self.db
            .conn()
            .execute(
                "UPDATE aws_idc SET access_token_expires_in = 0 WHERE instance_id = ?1",
                [instance_id],
            )
            .or_fatal("Failed to invalidate access token")?;
        Ok(())
    }

    async fn connected_sinks(
        &self,
        ctx: &AppContext,
        instance_id: &str,
    ) -> AppResult<Vec<SinkInstance>> {
        let mut sinks = Vec::new();
        for plumber in &self.plumbers {
            sinks.extend(
                plumber
                    .list_connected_sinks(ctx, PROVIDER_CODE, instance_id)
                    .await?,
            );
        }
        Ok(sinks)
    }

    fn load_registration(
        &self,
        ctx: &AppContext,
        region: &str,
    ) -> AppResult<Option<StoredRegistration>> {
        ctx.check()?;
        self.db
            .conn()
            .query_row(
                r#"
                SELECT client_id, client_secret_enc, created_at, expires_at, enc_key_id
                FROM aws_sso_clients
                WHERE region = ?1
                "#,
                [region],
                |row| {
                    Ok(StoredRegistration {
                        client_id: row.get(0)?,
                        client_secret_enc: row.get(1)?,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                        enc_key_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .or_fatal("Failed to load OIDC client registration")
    }

    /// Returns a usable OIDC client for `region`, registering one when none
    /// is stored or the stored one has expired.
    async fn get_or_register_client(
        &self,
        ctx: &AppContext,
        region: &str,
    ) -> AppResult<RegistrationResponse> {
        if let Some(stored) = self.load_registration(ctx, region)? {
            if self.clock.now_unix() <= stored.expires_at {
                let client_secret = self
                    .encryption
                    .decrypt(&stored.client_secret_enc, &stored.enc_key_id)?;
                return Ok(RegistrationResponse {
                    client_id: stored.client_id,
                    client_secret,
                    created_at: stored.created_at,
                    expires_at: stored.expires_at,
                });
            }
            info!(region = %region, client_id = %stored.client_id, "OIDC client expired");
        }

        let friendly_name = format!(
            "{}_{}",
            self.client_name_prefix,
            random_string(CLIENT_NAME_SUFFIX_LEN)
        );
        info!(region = %region, client = %friendly_name, "Registering OIDC client");

        let registered = ctx
            .run(self.sso.register_client(region, &friendly_name))
            .await?;
        let registration = registered.map_err(|err| {
            error!(region = %region, error = %err, "Failed to register OIDC client");
            AppError::from(ErrorCode::TransientAwsClientError)
        })?;

        let (secret_enc, key_id) = self.encryption.encrypt(&registration.client_secret)?;

        ctx.check()?;
        self.db
            .conn()
            .execute(
                r#"
                INSERT INTO aws_sso_clients (
                    region, client_id, client_secret_enc, created_at, expires_at, enc_key_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (region) DO UPDATE SET
                    client_id = excluded.client_id,
                    client_secret_enc = excluded.client_secret_enc,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at,
                    enc_key_id = excluded.enc_key_id
                "#,
                params![
                    region,
                    registration.client_id,
                    secret_enc,
                    registration.created_at,
                    registration.expires_at,
                    key_id,
                ],
            )
            .or_fatal("Failed to store OIDC client registration")?;

        info!(region = %region, client_id = %registration.client_id, "OIDC client registered");
        Ok(registration)
    }

    async fn create_token(
        &self,
        ctx: &AppContext,
        region: &str,
        client_id: &str,
        client_secret: &str,
        user_code: &str,
        device_code: &str,
    ) -> AppResult<TokenResponse> {
        let created = ctx
            .run(
                self.sso
                    .create_token(region, client_id, client_secret, user_code, device_code),
            )
            .await?;

        created.map_err(|err| match err {
            SsoError::DeviceFlowNotAuthorized => {
                debug!("Device flow not yet authorized");
                AppError::from(ErrorCode::DeviceAuthFlowNotAuthorized)
            }
            SsoError::DeviceCodeExpired => {
                debug!("Device code expired");
                AppError::from(ErrorCode::DeviceAuthFlowTimedOut)
            }
            err => {
                error!(error = %err, "Failed to create token");
                AppError::from(ErrorCode::TransientAwsClientError)
            }
        })
    }

    /// Encrypts the token set; the key id of the first encryption covers all three.
    fn encrypt_tokens(&self, token: &TokenResponse) -> AppResult<EncryptedTokens> {
        let (id_token, key_id) = self.encryption.encrypt(&token.id_token)?;
        let (access_token, _) = self.encryption.encrypt(&token.access_token)?;
        let (refresh_token, _) = self.encryption.encrypt(&token.refresh_token)?;
        Ok(EncryptedTokens {
            id_token,
            access_token,
            refresh_token,
            key_id,
        })
    }
}
