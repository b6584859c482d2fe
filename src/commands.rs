//! Boundary between the UI shell and the core.
//!
//! Commands arrive as JSON objects `{"command": "<Component>_<Op>", "input":
//! {...}}` and are decoded into [`Command`]. [`App::dispatch`] runs each one
//! under a fresh [`AppContext`] and folds the outcome into a
//! [`CommandResponse`]. A fatal outcome seals the vault before returning.

use crate::auth::AuthController;
use crate::aws_sso::{AwsSsoClient, HttpSsoClient};
use crate::clipboard::{Clipboard, SystemClipboard};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::dashboard::DashboardController;
use crate::db::Database;
use crate::error::{AppError, AppResult, ErrorCode, OrFatal};
use crate::eventing::EventBus;
use crate::favorites::FavoritesRepo;
use crate::plumbing::{AwsCredentials, DisconnectSinkInput, Plumber};
use crate::providers::aws_idc::{
    AwsIdcController, FinalizeRefreshInput, FinalizeSetupInput, FlowCredentialsInput,
    RoleInput, SaveRoleCredentialsInput, SetupInput,
};
use crate::providers::ProviderRegistry;
use crate::sinks::aws_credentials_file::{self, AwsCredentialsFileSink, NewInstanceInput};
use crate::sinks::SinkRegistry;
use crate::vault::kdf::ArgonParameters;
use crate::vault::{EncryptionService, Vault};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// User every command runs as; the app is single-user.
pub const DEFAULT_USER: &str = "root";

#[derive(Clone, Debug, Deserialize)]
pub struct PasswordInput {
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdInput {
    pub instance_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInstanceDataInput {
    pub instance_id: String,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCodeInput {
    pub provider_code: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDataInput {
    pub sink_id: String,
    pub instance_id: String,
    pub account_id: String,
    pub role_name: String,
}

/// Every operation the UI can request.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "command", content = "input")]
pub enum Command {
    #[serde(rename = "Auth_IsVaultConfigured")]
    AuthIsVaultConfigured,
    #[serde(rename = "Auth_ConfigureVault")]
    AuthConfigureVault(PasswordInput),
    #[serde(rename = "Auth_Unlock")]
    AuthUnlock(PasswordInput),
    #[serde(rename = "Auth_Lock")]
    AuthLock,

    #[serde(rename = "Dashboard_ListProviders")]
    DashboardListProviders,
    #[serde(rename = "Dashboard_ListFavorites")]
    DashboardListFavorites,
    #[serde(rename = "Dashboard_ListCompatibleSinks")]
    DashboardListCompatibleSinks(ProviderCodeInput),

    #[serde(rename = "AwsIdc_ListInstances")]
    AwsIdcListInstances,
    #[serde(rename = "AwsIdc_GetInstanceData")]
    AwsIdcGetInstanceData(GetInstanceDataInput),
    #[serde(rename = "AwsIdc_GetRoleCredentials")]
    AwsIdcGetRoleCredentials(RoleInput),
    #[serde(rename = "AwsIdc_CopyRoleCredentials")]
    AwsIdcCopyRoleCredentials(RoleInput),
    #[serde(rename = "AwsIdc_SaveRoleCredentials")]
    AwsIdcSaveRoleCredentials(SaveRoleCredentialsInput),
    #[serde(rename = "AwsIdc_Setup")]
    AwsIdcSetup(SetupInput),
    #[serde(rename = "AwsIdc_FinalizeSetup")]
    AwsIdcFinalizeSetup(FinalizeSetupInput),
    #[serde(rename = "AwsIdc_MarkAsFavorite")]
    AwsIdcMarkAsFavorite(InstanceIdInput),
    #[serde(rename = "AwsIdc_UnmarkAsFavorite")]
    AwsIdcUnmarkAsFavorite(InstanceIdInput),
    #[serde(rename = "AwsIdc_RefreshAccessToken")]
    AwsIdcRefreshAccessToken(InstanceIdInput),
    #[serde(rename = "AwsIdc_FinalizeRefreshAccessToken")]
    AwsIdcFinalizeRefreshAccessToken(FinalizeRefreshInput),

    #[serde(rename = "AwsCredentialsFile_NewInstance")]
    AwsCredentialsFileNewInstance(NewInstanceInput),
    #[serde(rename = "AwsCredentialsFile_GetInstanceData")]
    AwsCredentialsFileGetInstanceData(InstanceIdInput),
    #[serde(rename = "AwsCredentialsFile_DisconnectSink")]
    AwsCredentialsFileDisconnectSink(DisconnectSinkInput),
    #[serde(rename = "AwsCredentialsFile_FlowData")]
    AwsCredentialsFileFlowData(FlowDataInput),
}

impl Command {
    /// The component prefix of the wire name, used to tag logs.
    pub fn component(&self) -> &'static str {
        match self {
            Command::AuthIsVaultConfigured
            | Command::AuthConfigureVault(_)
            | Command::AuthUnlock(_)
            | Command::AuthLock => "Auth",
            Command::DashboardListProviders
            | Command::DashboardListFavorites
            | Command::DashboardListCompatibleSinks(_) => "Dashboard",
            Command::AwsIdcListInstances
            | Command::AwsIdcGetInstanceData(_)
            | Command::AwsIdcGetRoleCredentials(_)
            | Command::AwsIdcCopyRoleCredentials(_)
            | Command::AwsIdcSaveRoleCredentials(_)
            | Command::AwsIdcSetup(_)
            | Command::AwsIdcFinalizeSetup(_)
            | Command::AwsIdcMarkAsFavorite(_)
            | Command::AwsIdcUnmarkAsFavorite(_)
            | Command::AwsIdcRefreshAccessToken(_)
            | Command::AwsIdcFinalizeRefreshAccessToken(_) => "AwsIdc",
            Command::AwsCredentialsFileNewInstance(_)
            | Command::AwsCredentialsFileGetInstanceData(_)
            | Command::AwsCredentialsFileDisconnectSink(_)
            | Command::AwsCredentialsFileFlowData(_) => "AwsCredentialsFile",
        }
    }
}

/// Outcome of one command as seen by the UI.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Recoverable code, `CANCELLED`, or `FATAL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Why [`App::serve`] stopped reading commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeExit {
    EndOfInput,
    Shutdown,
    Fatal,
}

/// Collaborators that talk to the outside world.
pub struct AppDeps {
    pub db: Arc<Database>,
    pub clock: Arc<dyn Clock>,
    pub sso: Arc<dyn AwsSsoClient>,
    pub clipboard: Arc<dyn Clipboard>,
}

/// Fully wired application core.
pub struct App {
    vault: Arc<Vault>,
    bus: Arc<EventBus>,
    auth: AuthController,
    dashboard: DashboardController,
    aws_idc: AwsIdcController,
    credentials_file: Arc<AwsCredentialsFileSink>,
    user_id: String,
}

fn to_output<T: Serialize>(value: T) -> AppResult<Value> {
    serde_json::to_value(value).or_fatal("Failed to serialize command output")
}

impl App {
    /// Opens the database under the configured data directory and wires the
    /// real adapters.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let path = config.storage.database_path();
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        let sso = HttpSsoClient::new(&config.aws)?;

        Ok(Self::with_deps(
            config,
            AppDeps {
                db: Arc::new(db),
                clock: Arc::new(SystemClock),
                sso: Arc::new(sso),
                clipboard: Arc::new(SystemClipboard),
            },
        ))
    }

    pub fn with_deps(config: &AppConfig, deps: AppDeps) -> Self {
        let AppDeps {
            db,
            clock,
            sso,
            clipboard,
        } = deps;

        let vault = Arc::new(Vault::new(
            db.clone(),
            clock.clone(),
            ArgonParameters::from(&config.vault),
        ));
        let bus = Arc::new(EventBus::new(db.clone(), clock.clone()));
        let favorites = Arc::new(FavoritesRepo::new(db.clone()));
        let credentials_file = Arc::new(AwsCredentialsFileSink::new(db.clone(), clock.clone()));

        let mut aws_idc = AwsIdcController::new(
            db,
            bus.clone(),
            favorites.clone(),
            vault.clone() as Arc<dyn EncryptionService>,
            sso,
            clipboard,
            clock,
        )
        .with_client_name_prefix(config.aws.client_name_prefix.clone())
        .with_cache_capacity(config.cache.max_entries);
        aws_idc.add_plumbers([credentials_file.clone() as Arc<dyn Plumber<AwsCredentials>>]);

        Self {
            auth: AuthController::new(vault.clone()),
            dashboard: DashboardController::new(
                favorites,
                ProviderRegistry::default(),
                SinkRegistry::default(),
            ),
            vault,
            bus,
            aws_idc,
            credentials_file,
            user_id: DEFAULT_USER.to_string(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Decodes one JSON command and runs it. Malformed input yields
    /// `INVALID_COMMAND`.
    pub async fn dispatch_json(&self, raw: &str, cancellation: CancellationToken) -> CommandResponse {
        match serde_json::from_str::<Command>(raw) {
            Ok(command) => self.dispatch(command, cancellation).await,
            Err(e) => {
                let ctx = AppContext::for_request(&self.user_id, "unknown", cancellation);
                warn!(req_id = %ctx.request_id(), error = %e, "Rejected malformed command");
                self.respond(&ctx, Err(ErrorCode::InvalidCommand.into()))
            }
        }
    }

    pub async fn dispatch(&self, command: Command, cancellation: CancellationToken) -> CommandResponse {
        let ctx = AppContext::for_request(&self.user_id, command.component(), cancellation);
        let span = ctx.span().clone();
        let result = self.execute(&ctx, command).instrument(span).await;
        self.respond(&ctx, result)
    }

    /// Seals the vault and closes the event bus.
    pub fn shutdown(&self) {
        self.vault.seal();
        self.bus.close();
        info!("Core shut down");
    }

    /// Reads JSON commands line by line from `input` and writes one JSON
    /// response line per command to `output`.
    ///
    /// Every command runs under a child of `shutdown`, so cancelling it also
    /// cancels the command in flight. That command still gets its
    /// `CANCELLED` response before the loop stops.
    ///
    /// # Returns
    ///
    /// Why the loop ended. The caller is expected to call [`App::shutdown`]
    /// afterwards.
    pub async fn serve<R, W>(
        &self,
        input: R,
        mut output: W,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<ServeExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(ServeExit::Shutdown),
                line = lines.next_line() => line.context("Failed to read command")?,
            };
            let Some(line) = line else {
                return Ok(ServeExit::EndOfInput);
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = self.dispatch_json(&line, shutdown.child_token()).await;
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            output.write_all(&encoded).await?;
            output.flush().await?;

            if response.fatal {
                error!(req_id = %response.request_id, "Terminating after fatal error");
                return Ok(ServeExit::Fatal);
            }
        }
    }

    async fn execute(&self, ctx: &AppContext, command: Command) -> AppResult<Value> {
        match command {
            Command::AuthIsVaultConfigured => to_output(self.auth.is_vault_configured(ctx)?),
            Command::AuthConfigureVault(input) => {
                to_output(self.auth.configure_vault(ctx, &input.password).await?)
            }
            Command::AuthUnlock(input) => to_output(self.auth.unlock(ctx, &input.password).await?),
            Command::AuthLock => {
                self.auth.lock();
                Ok(Value::Null)
            }

            Command::DashboardListProviders => to_output(self.dashboard.list_providers()),
            Command::DashboardListFavorites => to_output(self.dashboard.list_favorites(ctx)?),
            Command::DashboardListCompatibleSinks(input) => {
                to_output(self.dashboard.list_compatible_sinks(&input.provider_code))
            }

            Command::AwsIdcListInstances => to_output(self.aws_idc.list_instances(ctx)?),
            Command::AwsIdcGetInstanceData(input) => to_output(
                self.aws_idc
                    .get_instance_data(ctx, &input.instance_id, input.force_refresh)
                    .await?,
            ),
            Command::AwsIdcGetRoleCredentials(input) => {
                to_output(self.aws_idc.get_role_credentials(ctx, &input).await?)
            }
            Command::AwsIdcCopyRoleCredentials(input) => {
                to_output(self.aws_idc.copy_role_credentials(ctx, &input).await?)
            }
            Command::AwsIdcSaveRoleCredentials(input) => {
                to_output(self.aws_idc.save_role_credentials(ctx, input).await?)
            }
            Command::AwsIdcSetup(input) => to_output(self.aws_idc.setup(ctx, input).await?),
            Command::AwsIdcFinalizeSetup(input) => {
                to_output(self.aws_idc.finalize_setup(ctx, input).await?)
            }
            Command::AwsIdcMarkAsFavorite(input) => {
                to_output(self.aws_idc.mark_as_favorite(ctx, &input.instance_id)?)
            }
            Command::AwsIdcUnmarkAsFavorite(input) => {
                to_output(self.aws_idc.unmark_as_favorite(ctx, &input.instance_id)?)
            }
            Command::AwsIdcRefreshAccessToken(input) => to_output(
                self.aws_idc
                    .refresh_access_token(ctx, &input.instance_id)
                    .await?,
            ),
            Command::AwsIdcFinalizeRefreshAccessToken(input) => {
                to_output(self.aws_idc.finalize_refresh_access_token(ctx, input).await?)
            }

            Command::AwsCredentialsFileNewInstance(input) => {
                to_output(self.credentials_file.new_instance(ctx, input)?)
            }
            Command::AwsCredentialsFileGetInstanceData(input) => to_output(
                self.credentials_file
                    .get_instance_data(ctx, &input.instance_id)?,
            ),
            Command::AwsCredentialsFileDisconnectSink(input) => {
                to_output(self.credentials_file.disconnect_sink(ctx, input).await?)
            }
            Command::AwsCredentialsFileFlowData(input) => to_output(
                self.aws_idc
                    .flow_credentials(
                        ctx,
                        FlowCredentialsInput {
                            sink_code: aws_credentials_file::SINK_CODE.to_string(),
                            sink_id: input.sink_id,
                            instance_id: input.instance_id,
                            account_id: input.account_id,
                            role_name: input.role_name,
                        },
                    )
                    .await?,
            ),
        }
    }

    fn respond(&self, ctx: &AppContext, result: AppResult<Value>) -> CommandResponse {
        let request_id = ctx.request_id().to_string();
        match result {
            Ok(output) => CommandResponse {
                request_id,
                output: (!output.is_null()).then_some(output),
                error: None,
                fatal: false,
            },
            Err(AppError::Validation(code)) => {
                warn!(req_id = %request_id, code = %code, "Command rejected");
                CommandResponse {
                    request_id,
                    output: None,
                    error: Some(code.to_string()),
                    fatal: false,
                }
            }
            Err(AppError::Cancelled) => {
                info!(req_id = %request_id, "Command cancelled");
                CommandResponse {
                    request_id,
                    output: None,
                    error: Some("CANCELLED".to_string()),
                    fatal: false,
                }
            }
            Err(AppError::Fatal(err)) => {
                error!(req_id = %request_id, error = %format!("{:#}", err), "Fatal error, sealing vault");
                self.vault.seal();
                CommandResponse {
                    request_id,
                    output: None,
                    error: Some("FATAL".to_string()),
                    fatal: true,
                }
            }
        }
    }
}
