//! Error model.
//!
//! Two disjoint kinds flow out of every controller:
//! - [`ErrorCode`]: recoverable, user-surfaceable codes.
//! - [`AppError::Fatal`]: anything that compromises data integrity
//!   (crypto, SQL, serialization, broken invariants). The dispatcher purges
//!   the key enclave and terminates on these.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Recoverable domain codes. Serialized as SCREAMING_SNAKE_CASE strings.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[error("INVALID_START_URL")]
    InvalidStartUrl,
    #[error("INVALID_AWS_REGION")]
    InvalidAwsRegion,
    #[error("INVALID_LABEL")]
    InvalidLabel,
    #[error("INVALID_AWS_PROFILE_NAME")]
    InvalidAwsProfileName,
    #[error("INVALID_PROVIDER_CODE")]
    InvalidProviderCode,
    #[error("INVALID_PROVIDER_ID")]
    InvalidProviderId,
    #[error("INSTANCE_WAS_NOT_FOUND")]
    InstanceWasNotFound,
    #[error("INSTANCE_ALREADY_REGISTERED")]
    InstanceAlreadyRegistered,
    #[error("DEVICE_AUTH_FLOW_NOT_AUTHORIZED")]
    DeviceAuthFlowNotAuthorized,
    #[error("DEVICE_AUTH_FLOW_TIMED_OUT")]
    DeviceAuthFlowTimedOut,
    #[error("TRANSIENT_AWS_CLIENT_ERROR")]
    TransientAwsClientError,
    #[error("STALE_AWS_ACCESS_TOKEN")]
    StaleAwsAccessToken,
    #[error("VAULT_ALREADY_CONFIGURED")]
    VaultAlreadyConfigured,
    #[error("VAULT_NOT_CONFIGURED")]
    VaultNotConfigured,
    #[error("VAULT_SEALED")]
    VaultSealed,
    #[error("INVALID_CREDENTIALS_FILE")]
    InvalidCredentialsFile,
    #[error("EMPTY_PROFILE")]
    EmptyProfile,
    #[error("EMPTY_KEY")]
    EmptyKey,
    #[error("EMPTY_KEY_VALUE")]
    EmptyKeyValue,
    #[error("BUS_CLOSED")]
    BusClosed,
    #[error("INVALID_COMMAND")]
    InvalidCommand,
}

/// Error returned by every controller entry point.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ErrorCode),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("fatal: {0:#}")]
    Fatal(anyhow::Error),
}

impl AppError {
    /// Wraps any error as fatal.
    pub fn fatal<E: Into<anyhow::Error>>(err: E) -> Self {
        AppError::Fatal(err.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Fatal(_))
    }

    /// The recoverable code, if this is not a fatal or cancellation error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Validation(code) => Some(*code),
            _ => None,
        }
    }
}

impl PartialEq<ErrorCode> for AppError {
    fn eq(&self, other: &ErrorCode) -> bool {
        self.code() == Some(*other)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Tags infrastructure failures as fatal, attaching a context message.
pub trait OrFatal<T> {
    fn or_fatal<C>(self, context: C) -> AppResult<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> OrFatal<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_fatal<C>(self, context: C) -> AppResult<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| {
            let err: anyhow::Error = e.into();
            AppError::Fatal(err.context(context))
        })
    }
}
