//! Boundary over the AWS SSO-OIDC and SSO portal APIs.

mod http;
pub mod regions;

pub use http::HttpSsoClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Adapter-level errors. Everything the controllers need to tell apart has
/// its own variant; the rest is `Other`.
#[derive(Error, Debug)]
pub enum SsoError {
    #[error("request is not valid")]
    InvalidRequest,

    #[error("device flow not authorized")]
    DeviceFlowNotAuthorized,

    #[error("device code expired")]
    DeviceCodeExpired,

    #[error("access token expired")]
    AccessTokenExpired,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub client_id: String,
    pub client_secret: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub user_code: String,
    pub device_code: String,
    pub interval: i32,
    pub expires_in: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsAccount {
    pub account_id: String,
    pub account_name: String,
    pub account_email: String,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Unix milliseconds, as reported by the portal
    pub expiration: i64,
}

#[async_trait]
pub trait AwsSsoClient: Send + Sync {
    async fn register_client(
        &self,
        region: &str,
        friendly_name: &str,
    ) -> Result<RegistrationResponse, SsoError>;

    async fn start_device_authorization(
        &self,
        region: &str,
        start_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AuthorizationResponse, SsoError>;

    async fn create_token(
        &self,
        region: &str,
        client_id: &str,
        client_secret: &str,
        user_code: &str,
        device_code: &str,
    ) -> Result<TokenResponse, SsoError>;

    /// Every account visible to the token, with the roles in each.
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
    ) -> Result<Vec<AwsAccount>, SsoError>;

    async fn get_role_credentials(
        &self,
        region: &str,
        account_id: &str,
        role_name: &str,
        access_token: &str,
    ) -> Result<RoleCredentials, SsoError>;
}
