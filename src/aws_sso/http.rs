//! reqwest implementation of [`AwsSsoClient`] against the public REST
//! endpoints (`oidc.{region}.amazonaws.com`, `portal.sso.{region}.amazonaws.com`).

use super::{
    AuthorizationResponse, AwsAccount, AwsSsoClient, RegistrationResponse, RoleCredentials,
    SsoError, TokenResponse,
};
use crate::config::AwsConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const BEARER_HEADER: &str = "x-amz-sso_bearer_token";
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";
const PAGE_SIZE: &str = "100";

pub struct HttpSsoClient {
    http_client: Client,
    oidc_endpoint: Option<String>,
    portal_endpoint: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: &'a str,
    client_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientOutput {
    client_id: String,
    client_secret: String,
    client_id_issued_at: i64,
    client_secret_expires_at: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationOutput {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: String,
    expires_in: i32,
    #[serde(default)]
    interval: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenOutput {
    access_token: String,
    token_type: String,
    expires_in: i32,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    account_id: String,
    #[serde(default)]
    account_name: String,
    #[serde(default)]
    email_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountsOutput {
    #[serde(default)]
    account_list: Vec<AccountInfo>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleInfo {
    role_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountRolesOutput {
    #[serde(default)]
    role_list: Vec<RoleInfo>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsInfo {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoleCredentialsOutput {
    role_credentials: RoleCredentialsInfo,
}

/// Error body shapes used by the two services.
#[derive(Deserialize, Default)]
struct ErrorBody {
    error: Option<String>,
    #[serde(rename = "__type")]
    error_type: Option<String>,
}

/// A non-2xx answer, reduced to what classification needs.
#[derive(Debug)]
struct ServiceError {
    status: StatusCode,
    kind: String,
}

impl ServiceError {
    fn is(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.kind.eq_ignore_ascii_case(n))
    }

    fn into_other(self, operation: &str) -> SsoError {
        SsoError::Other(anyhow!(
            "{} failed with {} ({})",
            operation,
            self.status,
            if self.kind.is_empty() { "unknown" } else { self.kind.as_str() }
        ))
    }
}

impl HttpSsoClient {
    pub fn new(config: &AwsConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("credflow/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            oidc_endpoint: config.oidc_endpoint.clone(),
            portal_endpoint: config.portal_endpoint.clone(),
        })
    }

    fn oidc_url(&self, region: &str, path: &str) -> String {
        match &self.oidc_endpoint {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => format!("https://oidc.{}.{}{}", region, dns_suffix(region), path),
        }
    }

    fn portal_url(&self, region: &str, path: &str) -> String {
        match &self.portal_endpoint {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => format!("https://portal.sso.{}.{}{}", region, dns_suffix(region), path),
        }
    }

    /// POSTs a JSON body to the OIDC service.
    async fn oidc_call<B: Serialize>(
        &self,
        region: &str,
        path: &str,
        body: &B,
    ) -> Result<std::result::Result<Response, ServiceError>> {
        let response = self
            .http_client
            .post(self.oidc_url(region, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send OIDC request {}", path))?;
        split_status(response).await
    }

    /// GETs a portal resource with the bearer token header.
    async fn portal_call(
        &self,
        region: &str,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<std::result::Result<Response, ServiceError>> {
        let response = self
            .http_client
            .get(self.portal_url(region, path))
            .header(BEARER_HEADER, access_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send portal request {}", path))?;
        split_status(response).await
    }

    async fn list_account_roles(
        &self,
        region: &str,
        account_id: &str,
        access_token: &str,
    ) -> std::result::Result<Vec<String>, SsoError> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("account_id", account_id), ("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }

            let response = self
                .portal_call(region, "/assignment/roles", access_token, &query)
                .await?
                .map_err(|e| portal_error(e, "ListAccountRoles"))?;
            let page: ListAccountRolesOutput = response
                .json()
                .await
                .context("Failed to parse ListAccountRoles response")?;

            roles.extend(page.role_list.into_iter().map(|r| r.role_name));
            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(roles)
    }
}

#[async_trait]
impl AwsSsoClient for HttpSsoClient {
    async fn register_client(
        &self,
        region: &str,
        friendly_name: &str,
    ) -> std::result::Result<RegistrationResponse, SsoError> {
        let request = RegisterClientRequest {
            client_name: friendly_name,
            client_type: "public",
        };
        let response = self
            .oidc_call(region, "/client/register", &request)
            .await?
            .map_err(|e| e.into_other("RegisterClient"))?;
        let output: RegisterClientOutput = response
            .json()
            .await
            .context("Failed to parse RegisterClient response")?;

        debug!(region = %region, client_name = %friendly_name, "OIDC client registered");
        Ok(RegistrationResponse {
            client_id: output.client_id,
            client_secret: output.client_secret,
            created_at: output.client_id_issued_at,
            expires_at: output.client_secret_expires_at,
        })
    }

    async fn start_device_authorization(
        &self,
        region: &str,
        start_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> std::result::Result<AuthorizationResponse, SsoError> {
        let request = StartDeviceAuthorizationRequest {
            client_id,
            client_secret,
            start_url,
        };
        let response = self
            .oidc_call(region, "/device_authorization", &request)
            .await?
            .map_err(|e| {
                if e.is(&["invalid_request", "InvalidRequestException"]) {
                    SsoError::InvalidRequest
                } else {
                    e.into_other("StartDeviceAuthorization")
                }
            })?;
        let output: StartDeviceAuthorizationOutput = response
            .json()
            .await
            .context("Failed to parse StartDeviceAuthorization response")?;

        Ok(AuthorizationResponse {
            verification_uri: output.verification_uri,
            verification_uri_complete: output.verification_uri_complete,
            user_code: output.user_code,
            device_code: output.device_code,
            interval: output.interval,
            expires_in: output.expires_in,
        })
    }

    async fn create_token(
        &self,
        region: &str,
        client_id: &str,
        client_secret: &str,
        user_code: &str,
        device_code: &str,
    ) -> std::result::Result<TokenResponse, SsoError> {
        let request = CreateTokenRequest {
            client_id,
            client_secret,
            grant_type: DEVICE_CODE_GRANT,
            device_code,
            code: user_code,
        };
        let response = self
            .oidc_call(region, "/token", &request)
            .await?
            .map_err(|e| {
                if e.is(&["authorization_pending", "AuthorizationPendingException"]) {
                    SsoError::DeviceFlowNotAuthorized
                } else if e.is(&["expired_token", "ExpiredTokenException"]) {
                    SsoError::DeviceCodeExpired
                } else {
                    e.into_other("CreateToken")
                }
            })?;
        let output: CreateTokenOutput = response
            .json()
            .await
            .context("Failed to parse CreateToken response")?;

        Ok(TokenResponse {
            id_token: output.id_token.unwrap_or_default(),
            access_token: output.access_token,
            refresh_token: output.refresh_token.unwrap_or_default(),
            token_type: output.token_type,
            expires_in: output.expires_in,
        })
    }

    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
    ) -> std::result::Result<Vec<AwsAccount>, SsoError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }

            let response = self
                .portal_call(region, "/assignment/accounts", access_token, &query)
                .await?
                .map_err(|e| portal_error(e, "ListAccounts"))?;
            let page: ListAccountsOutput = response
                .json()
                .await
                .context("Failed to parse ListAccounts response")?;

            for account in page.account_list {
                let roles = self
                    .list_account_roles(region, &account.account_id, access_token)
                    .await?;
                accounts.push(AwsAccount {
                    account_id: account.account_id,
                    account_name: account.account_name,
                    account_email: account.email_address,
                    roles,
                });
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(region = %region, count = accounts.len(), "Listed accounts");
        Ok(accounts)
    }

    async fn get_role_credentials(
        &self,
        region: &str,
        account_id: &str,
        role_name: &str,
        access_token: &str,
    ) -> std::result::Result<RoleCredentials, SsoError> {
        let query = [("account_id", account_id), ("role_name", role_name)];
        let response = self
            .portal_call(region, "/federation/credentials", access_token, &query)
            .await?
            .map_err(|e| portal_error(e, "GetRoleCredentials"))?;
        let output: GetRoleCredentialsOutput = response
            .json()
            .await
            .context("Failed to parse GetRoleCredentials response")?;

        let creds = output.role_credentials;
        Ok(RoleCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration: creds.expiration,
        })
    }
}

/// Domain of the regional endpoints; the China partition has its own.
fn dns_suffix(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    }
}

/// Portal calls reject an expired or revoked bearer token with 401.
fn portal_error(e: ServiceError, operation: &str) -> SsoError {
    if e.status == StatusCode::UNAUTHORIZED
        || e.is(&["ExpiredTokenException", "UnauthorizedException", "expired_token"])
    {
        SsoError::AccessTokenExpired
    } else {
        e.into_other(operation)
    }
}

/// Passes 2xx responses through; reads the error kind out of anything else.
async fn split_status(response: Response) -> Result<std::result::Result<Response, ServiceError>> {
    let status = response.status();
    if status.is_success() {
        return Ok(Ok(response));
    }

    let header_kind = error_type_from_headers(response.headers());
    let body = response
        .text()
        .await
        .context("Failed to read error response body")?;
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();

    let kind = parsed
        .error
        .or(parsed.error_type.map(|t| strip_error_type(&t)))
        .or(header_kind)
        .unwrap_or_default();

    debug!(status = %status, kind = %kind, "AWS service error");
    Ok(Err(ServiceError { status, kind }))
}

fn error_type_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ERROR_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(strip_error_type)
}

/// `"AuthorizationPendingException:http://..."` and
/// `"com.amazonaws#ExpiredTokenException"` both reduce to the bare name.
fn strip_error_type(raw: &str) -> String {
    let name = raw.split(':').next().unwrap_or(raw);
    name.rsplit('#').next().unwrap_or(name).to_string()
}
