//! Test doubles shared by unit and integration tests.
//!
//! Compiled for `cfg(test)` and behind the `test-utils` feature.

use crate::aws_sso::{
    AuthorizationResponse, AwsAccount, AwsSsoClient, RegistrationResponse, RoleCredentials,
    SsoError, TokenResponse,
};
use crate::clipboard::Clipboard;
use crate::clock::Clock;
use crate::context::AppContext;
use crate::error::{AppResult, ErrorCode};
use crate::vault::EncryptionService;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Clock pinned to a settable Unix time.
#[derive(Debug, Default)]
pub struct MockClock {
    now: AtomicI64,
}

impl MockClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One scripted adapter method: queued outcomes first, then the default.
struct Script<T: Clone> {
    queue: Mutex<VecDeque<Result<T, SsoError>>>,
    default: T,
    calls: AtomicUsize,
    last_args: Mutex<Vec<String>>,
}

impl<T: Clone> Script<T> {
    fn new(default: T) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            last_args: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, args: &[&str]) -> Result<T, SsoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = args.iter().map(|a| a.to_string()).collect();
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }

    fn push(&self, outcome: Result<T, SsoError>) {
        self.queue.lock().unwrap().push_back(outcome);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_args(&self) -> Vec<String> {
        self.last_args.lock().unwrap().clone()
    }
}

/// Scriptable in-memory [`AwsSsoClient`] that counts calls per method.
pub struct FakeSsoClient {
    register: Script<RegistrationResponse>,
    authorize: Script<AuthorizationResponse>,
    token: Script<TokenResponse>,
    accounts: Script<Vec<AwsAccount>>,
    role_credentials: Script<RoleCredentials>,
}

impl FakeSsoClient {
    pub const CLIENT_ID: &'static str = "client-1";
    pub const CLIENT_SECRET: &'static str = "client-secret-1";
    pub const USER_CODE: &'static str = "WXYZ-1234";
    pub const DEVICE_CODE: &'static str = "dc-1";
    pub const ACCESS_TOKEN: &'static str = "access-token-1";

    pub fn new() -> Self {
        Self {
            register: Script::new(RegistrationResponse {
                client_id: Self::CLIENT_ID.to_string(),
                client_secret: Self::CLIENT_SECRET.to_string(),
                created_at: 0,
                expires_at: i64::MAX,
            }),
            authorize: Script::new(AuthorizationResponse {
                verification_uri: "https://device.sso.eu-west-1.amazonaws.com/".to_string(),
                verification_uri_complete:
                    "https://device.sso.eu-west-1.amazonaws.com/?user_code=WXYZ-1234".to_string(),
                user_code: Self::USER_CODE.to_string(),
                device_code: Self::DEVICE_CODE.to_string(),
                interval: 5,
                expires_in: 600,
            }),
            token: Script::new(TokenResponse {
                id_token: "id-token-1".to_string(),
                access_token: Self::ACCESS_TOKEN.to_string(),
                refresh_token: "refresh-token-1".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 28_800,
            }),
            accounts: Script::new(vec![AwsAccount {
                account_id: "111111111111".to_string(),
                account_name: "prod".to_string(),
                account_email: "prod@example.com".to_string(),
                roles: vec!["AdministratorAccess".to_string(), "ReadOnly".to_string()],
            }]),
            role_credentials: Script::new(RoleCredentials {
                access_key_id: "ASIAEXAMPLE".to_string(),
                secret_access_key: "secret-key".to_string(),
                session_token: "session-token".to_string(),
                expiration: 1_700_003_600_000,
            }),
        }
    }

    pub fn push_registration(&self, outcome: Result<RegistrationResponse, SsoError>) {
        self.register.push(outcome);
    }

    pub fn push_authorization(&self, outcome: Result<AuthorizationResponse, SsoError>) {
        self.authorize.push(outcome);
    }

    pub fn push_token(&self, outcome: Result<TokenResponse, SsoError>) {
        self.token.push(outcome);
    }

    pub fn push_accounts(&self, outcome: Result<Vec<AwsAccount>, SsoError>) {
        self.accounts.push(outcome);
    }

    pub fn push_role_credentials(&self, outcome: Result<RoleCredentials, SsoError>) {
        self.role_credentials.push(outcome);
    }

    pub fn register_calls(&self) -> usize {
        self.register.calls()
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize.calls()
    }

    pub fn token_calls(&self) -> usize {
        self.token.calls()
    }

    pub fn list_accounts_calls(&self) -> usize {
        self.accounts.calls()
    }

    pub fn role_credentials_calls(&self) -> usize {
        self.role_credentials.calls()
    }

    /// Arguments of the most recent `register_client` call.
    pub fn last_register_args(&self) -> Vec<String> {
        self.register.last_args()
    }

    /// Arguments of the most recent `create_token` call.
    pub fn last_token_args(&self) -> Vec<String> {
        self.token.last_args()
    }

    /// Arguments of the most recent `list_accounts` call.
    pub fn last_list_accounts_args(&self) -> Vec<String> {
        self.accounts.last_args()
    }
}

impl Default for FakeSsoClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AwsSsoClient for FakeSsoClient {
    async fn register_client(
        &self,
        region: &str,
        friendly_name: &str,
    ) -> Result<RegistrationResponse, SsoError> {
        self.register.next(&[region, friendly_name])
    }

    async fn start_device_authorization(
        &self,
        region: &str,
        start_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AuthorizationResponse, SsoError> {
        self.authorize
            .next(&[region, start_url, client_id, client_secret])
    }

    async fn create_token(
        &self,
        region: &str,
        client_id: &str,
        client_secret: &str,
        user_code: &str,
        device_code: &str,
    ) -> Result<TokenResponse, SsoError> {
        self.token
            .next(&[region, client_id, client_secret, user_code, device_code])
    }

    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
    ) -> Result<Vec<AwsAccount>, SsoError> {
        self.accounts.next(&[region, access_token])
    }

    async fn get_role_credentials(
        &self,
        region: &str,
        account_id: &str,
        role_name: &str,
        access_token: &str,
    ) -> Result<RoleCredentials, SsoError> {
        self.role_credentials
            .next(&[region, account_id, role_name, access_token])
    }
}

/// Reversible, non-cryptographic [`EncryptionService`] with key id `plain`.
#[derive(Debug, Default)]
pub struct PlainEncryption {
    sealed: AtomicBool,
}

impl PlainEncryption {
    pub const KEY_ID: &'static str = "plain";
    const PREFIX: &'static str = "enc:";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }
}

impl EncryptionService for PlainEncryption {
    fn encrypt(&self, plaintext: &str) -> AppResult<(String, String)> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(ErrorCode::VaultSealed.into());
        }
        Ok((format!("{}{}", Self::PREFIX, plaintext), Self::KEY_ID.to_string()))
    }

    fn decrypt(&self, ciphertext: &str, key_id: &str) -> AppResult<String> {
        if self.sealed.load(Ordering::SeqCst) || key_id != Self::KEY_ID {
            return Err(ErrorCode::VaultSealed.into());
        }
        ciphertext
            .strip_prefix(Self::PREFIX)
            .map(str::to_string)
            .ok_or_else(|| {
                crate::error::AppError::fatal(anyhow::anyhow!("ciphertext without plain prefix"))
            })
    }
}

/// Clipboard that keeps the last written text.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write_text(&self, ctx: &AppContext, text: &str) -> AppResult<()> {
        ctx.check()?;
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }
}
