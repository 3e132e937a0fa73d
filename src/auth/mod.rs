//! Credential acquisition for the streaming platform.
//!
//! Two routes end in a bearer token:
//! - [`local_scan`] reads a token the desktop app or a browser already persisted
//! - [`capture`] drives a real browser through the login page, and
//!   [`exchange`] trades the resulting authorization code for a token
//!
//! [`flow`] composes both routes behind the uniform envelope the CLI prints.

pub mod capture;
pub mod driver_setup;
pub mod exchange;
pub mod flow;
pub mod local_scan;
pub mod pkce;
pub mod webdriver;

pub use capture::{capture, BrowserLauncher, BrowserSession, CaptureOptions, LaunchOptions};
pub use exchange::{CodeExchanger, EmptyReason, ExchangeOptions, ExchangeOutcome};
pub use flow::{Phase, ProgressEvent, ProgressObserver, TokenAcquirer, TokenEnvelope, WebTokenError};
pub use local_scan::{LocalTokenScanner, Platform, ScanError};
pub use pkce::PkceChallenge;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque bearer credential presented as `Authorization: Bearer <token>`.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// First few characters followed by an ellipsis, safe for logs.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{}…", prefix)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BearerToken").field(&self.redacted()).finish()
    }
}

/// Single-use code read from the login redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors raised by the credential-acquisition layer.
///
/// Expected negative outcomes (a rejected code, a user who never finished
/// logging in) are not errors; see [`ExchangeOutcome`] and [`capture()`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebDriver binary not found (searched: {searched})")]
    DriverMissing { searched: String },

    #[error("Browser automation failed: {0}")]
    Automation(String),

    #[error("Driver setup failed: {0}")]
    DriverSetup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Transport-level failures are the ones the exchanger retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, AuthError::Network(_) | AuthError::Timeout(_))
    }
}
