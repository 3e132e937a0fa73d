//! Top-level error for the command-line surface

use crate::accounts::AccountError;
use crate::auth::{AuthError, ScanError, WebTokenError};
use crate::streaming::StreamError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Login(#[from] WebTokenError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON shape of a failure on stdout
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Scan(ScanError::UnsupportedPlatform(_)) => "unsupported_platform",
            AppError::Scan(ScanError::NotFound { .. }) => "token_not_found",
            AppError::Scan(_) => "scan_failed",
            AppError::Login(WebTokenError::DriverMissing { .. }) => "driver_missing",
            AppError::Login(WebTokenError::TimedOut(_)) => "login_timeout",
            AppError::Login(WebTokenError::ExchangeRejected(_)) => "login_rejected",
            AppError::Login(WebTokenError::Exchange(_)) => "network_error",
            AppError::Login(WebTokenError::Automation(_)) => "automation_failed",
            AppError::Login(WebTokenError::CaptureBusy) => "login_in_progress",
            AppError::Auth(AuthError::DriverMissing { .. }) => "driver_missing",
            AppError::Auth(AuthError::DriverSetup(_)) => "driver_setup_failed",
            AppError::Auth(AuthError::Timeout(_)) => "timeout",
            AppError::Auth(AuthError::Network(_)) => "network_error",
            AppError::Auth(_) => "automation_failed",
            AppError::Stream(StreamError::Unauthenticated) => "unauthenticated",
            AppError::Stream(StreamError::SessionActive { .. }) => "session_active",
            AppError::Stream(StreamError::Http { .. }) => "http_error",
            AppError::Stream(_) => "network_error",
            AppError::Account(AccountError::NotFound(_)) => "account_not_found",
            AppError::Account(AccountError::MissingToken(_)) => "token_not_found",
            AppError::Account(AccountError::CaptureInProgress { .. }) => "login_in_progress",
            AppError::Account(_) => "account_store_error",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// 1 invalid input, 2 network or API, 3 not found, 4 timeout,
    /// 5 setup or dependency, 6 anything else
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::InvalidInput(_)
            | AppError::Stream(StreamError::Unauthenticated)
            | AppError::Stream(StreamError::SessionActive { .. }) => 1,
            AppError::Login(WebTokenError::Exchange(_))
            | AppError::Login(WebTokenError::ExchangeRejected(_))
            | AppError::Auth(AuthError::Network(_))
            | AppError::Stream(_) => 2,
            AppError::Scan(ScanError::NotFound { .. })
            | AppError::Account(AccountError::NotFound(_))
            | AppError::Account(AccountError::MissingToken(_)) => 3,
            AppError::Login(WebTokenError::TimedOut(_)) | AppError::Auth(AuthError::Timeout(_)) => 4,
            AppError::Scan(ScanError::UnsupportedPlatform(_))
            | AppError::Login(WebTokenError::DriverMissing { .. })
            | AppError::Auth(AuthError::DriverMissing { .. })
            | AppError::Auth(AuthError::DriverSetup(_))
            | AppError::Config(_) => 5,
            _ => 6,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.error_code(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Auth(AuthError::Network(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
