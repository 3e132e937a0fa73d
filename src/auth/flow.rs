//! Token acquisition as the user sees it.
//!
//! [`TokenAcquirer`] composes the local scanner, browser capture and code
//! exchange, reports structured progress, and folds every outcome into the
//! `{token, error}` envelope.

use super::capture::{capture_with_progress, BrowserLauncher, CaptureOptions};
use super::exchange::{CodeExchanger, EmptyReason, ExchangeOptions, ExchangeOutcome};
use super::local_scan::{LocalTokenScanner, ScanError};
use super::pkce::PkceChallenge;
use super::{AuthError, BearerToken};
use crate::accounts::{AccountError, CaptureLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default origin of the login page
pub const LOGIN_BASE: &str = "https://streamlabs.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    LaunchingBrowser,
    WaitingForLogin,
    ExchangingCode,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub detail: String,
}

impl ProgressEvent {
    pub fn new(phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
        }
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Uniform outer shape of every token request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub token: Option<String>,
    pub error: Option<String>,
}

impl TokenEnvelope {
    pub fn success(token: &BearerToken) -> Self {
        Self {
            token: Some(token.as_str().to_string()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            token: None,
            error: Some(error.into()),
        }
    }

    /// Outcome of a local scan; a failure points at the browser login
    pub fn from_scan(result: &Result<BearerToken, ScanError>) -> Self {
        match result {
            Ok(token) => Self::success(token),
            Err(e) => Self::failure(format!("{} You can log in through the browser instead.", e)),
        }
    }

    pub fn from_web_login(result: &Result<BearerToken, WebTokenError>) -> Self {
        match result {
            Ok(token) => Self::success(token),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Why a browser login produced no token. Each variant calls for a
/// different user action.
#[derive(Debug, Error)]
pub enum WebTokenError {
    #[error("Browser driver not found (searched: {searched}). Run `tiklive driver install` and try again.")]
    DriverMissing { searched: String },

    #[error("Login was not completed within {} seconds. Start the login again when ready.", .0.as_secs())]
    TimedOut(Duration),

    #[error("Login failed: {0}. Please log in again.")]
    ExchangeRejected(EmptyReason),

    #[error("Could not reach the token endpoint: {0}")]
    Exchange(#[source] AuthError),

    #[error("Browser automation failed: {0}")]
    Automation(#[source] AuthError),

    #[error("A login is already in progress for this account")]
    CaptureBusy,
}

pub struct TokenAcquirer {
    scanner: LocalTokenScanner,
    launcher: Arc<dyn BrowserLauncher>,
    exchanger: CodeExchanger,
    exchange_options: ExchangeOptions,
    capture_options: CaptureOptions,
    login_base: String,
}

impl TokenAcquirer {
    pub fn new(
        scanner: LocalTokenScanner,
        launcher: Arc<dyn BrowserLauncher>,
        exchanger: CodeExchanger,
    ) -> Self {
        Self {
            scanner,
            launcher,
            exchanger,
            exchange_options: ExchangeOptions::default(),
            capture_options: CaptureOptions::default(),
            login_base: LOGIN_BASE.to_string(),
        }
    }

    pub fn with_exchange_options(mut self, options: ExchangeOptions) -> Self {
        self.exchange_options = options;
        self
    }

    pub fn with_capture_options(mut self, options: CaptureOptions) -> Self {
        self.capture_options = options;
        self
    }

    pub fn with_login_base(mut self, base: impl Into<String>) -> Self {
        self.login_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn login_url(&self, challenge: &str) -> String {
        format!(
            "{}/m/login?force_verify=1&external=mobile&skip_splash=1&tiktok&code_challenge={}",
            self.login_base,
            urlencoding::encode(challenge)
        )
    }

    /// Scan local storage off the async runtime
    pub async fn local_token(&self) -> Result<BearerToken, ScanError> {
        self.scanner.scan_blocking_task().await
    }

    /// Interactive browser login followed by the code exchange
    ///
    /// `profile_dir` pins the browser to a per-account profile; at most one
    /// login may use a given profile at a time.
    pub async fn load_web_token(
        &self,
        profile_dir: Option<&Path>,
        observer: &dyn ProgressObserver,
    ) -> Result<BearerToken, WebTokenError> {
        let result = self.run_web_login(profile_dir, observer).await;
        match &result {
            Ok(_) => observer.on_progress(&ProgressEvent::new(Phase::Done, "Logged in")),
            Err(e) => {
                warn!(error = %e, "web login failed");
                observer.on_progress(&ProgressEvent::new(Phase::Failed, e.to_string()));
            }
        }
        result
    }

    async fn run_web_login(
        &self,
        profile_dir: Option<&Path>,
        observer: &dyn ProgressObserver,
    ) -> Result<BearerToken, WebTokenError> {
        observer.on_progress(&ProgressEvent::new(Phase::Initializing, "Preparing login"));

        let _lock = match profile_dir {
            Some(dir) => Some(CaptureLock::acquire(dir).map_err(|e| match e {
                AccountError::CaptureInProgress { .. } => WebTokenError::CaptureBusy,
                other => WebTokenError::Automation(AuthError::Automation(other.to_string())),
            })?),
            None => None,
        };

        let pkce = PkceChallenge::generate();
        let login_url = self.login_url(&pkce.challenge);
        let options = CaptureOptions {
            profile_dir: profile_dir.map(Path::to_path_buf),
            ..self.capture_options.clone()
        };

        observer.on_progress(&ProgressEvent::new(Phase::LaunchingBrowser, "Opening browser"));
        let code = capture_with_progress(self.launcher.as_ref(), &login_url, &options, observer)
            .await
            .map_err(|e| match e {
                AuthError::DriverMissing { searched } => WebTokenError::DriverMissing { searched },
                other => WebTokenError::Automation(other),
            })?
            .ok_or(WebTokenError::TimedOut(options.timeout))?;

        observer.on_progress(&ProgressEvent::new(Phase::ExchangingCode, "Exchanging authorization code"));
        match self
            .exchanger
            .exchange(&code, &pkce.verifier, &self.exchange_options)
            .await
        {
            ExchangeOutcome::Token(token) => {
                info!(token = %token.redacted(), "web login complete");
                Ok(token)
            }
            ExchangeOutcome::Empty(reason) => Err(WebTokenError::ExchangeRejected(reason)),
            ExchangeOutcome::Transport(e) => Err(WebTokenError::Exchange(e)),
        }
    }
}
