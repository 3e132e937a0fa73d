//! Authorization-code → bearer-token exchange with retry, timeout and backoff.
//!
//! The token endpoint is a plain `GET` carrying `code` and `code_verifier` as
//! query parameters. Attempts are strictly sequential: a later attempt only
//! starts after the previous one failed and the retry delay elapsed.

use super::{AuthError, AuthorizationCode, BearerToken};
use crate::http::DESKTOP_USER_AGENT;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path of the token endpoint below the API base URL
pub const TOKEN_PATH: &str = "/api/v5/slobs/auth/data";

/// Longest response-body excerpt handed to the error observer
const BODY_EXCERPT_CHARS: usize = 300;

/// Observer invoked for every non-success response
pub type ErrorObserver = Arc<dyn Fn(&ExchangeErrorEvent) + Send + Sync>;

/// What went wrong on one attempt, as reported to [`ErrorObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeErrorEvent {
    /// 1-based attempt number
    pub attempt: u32,
    pub status: Option<u16>,
    pub detail: ExchangeErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeErrorDetail {
    /// Non-success status; holds the start of the response body
    Body(String),
    InvalidJson,
    NoToken,
}

/// Exchange configuration. Every recognized field is listed here.
#[derive(Clone)]
pub struct ExchangeOptions {
    /// Per-attempt timeout covering request and body
    pub timeout: Duration,
    /// Additional attempts after the first. `0` means exactly one attempt.
    pub retries: u32,
    /// Statuses that trigger another attempt while attempts remain
    pub retry_statuses: BTreeSet<u16>,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Extra headers; a name matching a default header replaces it
    pub headers: BTreeMap<String, String>,
    pub on_error: Option<ErrorObserver>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            retries: 1,
            retry_statuses: [401, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_delay: Duration::from_millis(2_000),
            headers: BTreeMap::new(),
            on_error: None,
        }
    }
}

impl fmt::Debug for ExchangeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeOptions")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_statuses", &self.retry_statuses)
            .field("retry_delay", &self.retry_delay)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ExchangeOptions {
    /// Attach an observer for non-success responses
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ExchangeErrorEvent) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(observer));
        self
    }

    fn notify(&self, event: ExchangeErrorEvent) {
        if let Some(observer) = &self.on_error {
            observer(&event);
        }
    }
}

/// Why an exchange produced no token even though the transport worked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    Rejected { status: u16 },
    InvalidJson,
    NoToken,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyReason::Rejected { status } => {
                write!(f, "token endpoint rejected the code (HTTP {})", status)
            }
            EmptyReason::InvalidJson => write!(f, "token endpoint returned malformed JSON"),
            EmptyReason::NoToken => write!(f, "token endpoint response carried no token"),
        }
    }
}

/// Result of [`CodeExchanger::exchange`]
#[derive(Debug)]
pub enum ExchangeOutcome {
    Token(BearerToken),
    /// Handled failure: the user should simply try logging in again
    Empty(EmptyReason),
    /// Transport failure on the final attempt: something is broken
    Transport(AuthError),
}

impl ExchangeOutcome {
    /// Collapse into the `Option`/error dual channel
    pub fn into_result(self) -> Result<Option<BearerToken>, AuthError> {
        match self {
            ExchangeOutcome::Token(token) => Ok(Some(token)),
            ExchangeOutcome::Empty(_) => Ok(None),
            ExchangeOutcome::Transport(err) => Err(err),
        }
    }

    pub fn token(&self) -> Option<&BearerToken> {
        match self {
            ExchangeOutcome::Token(token) => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    oauth_token: Option<String>,
}

/// One completed HTTP round trip
enum Attempt {
    Success(String),
    Failure { status: u16, body: String },
}

/// Exchanges authorization codes at the fixed token endpoint
#[derive(Debug, Clone)]
pub struct CodeExchanger {
    http: reqwest::Client,
    endpoint: String,
}

impl CodeExchanger {
    /// Exchanger for the token endpoint under `base_url`
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self::with_endpoint(http, format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH))
    }

    pub fn with_endpoint(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Trade `code` and its PKCE `verifier` for a bearer token
    pub async fn exchange(
        &self,
        code: &AuthorizationCode,
        verifier: &str,
        options: &ExchangeOptions,
    ) -> ExchangeOutcome {
        let attempts = options.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last = attempt >= attempts;
            debug!(attempt, attempts, endpoint = %self.endpoint, "exchanging authorization code");

            match self.attempt(code, verifier, options).await {
                Err(err) => {
                    if last {
                        warn!(attempt, error = %err, "token exchange transport failure, giving up");
                        return ExchangeOutcome::Transport(err);
                    }
                    warn!(attempt, error = %err, "token exchange transport failure, retrying");
                }
                Ok(Attempt::Failure { status, body }) => {
                    options.notify(ExchangeErrorEvent {
                        attempt,
                        status: Some(status),
                        detail: ExchangeErrorDetail::Body(excerpt(&body)),
                    });
                    if !last && options.retry_statuses.contains(&status) {
                        warn!(attempt, status, "token endpoint returned retryable status");
                    } else {
                        warn!(attempt, status, "token endpoint rejected the code");
                        return ExchangeOutcome::Empty(EmptyReason::Rejected { status });
                    }
                }
                Ok(Attempt::Success(body)) => return parse_token(attempt, &body, options),
            }

            tokio::time::sleep(options.retry_delay).await;
        }
    }

    async fn attempt(
        &self,
        code: &AuthorizationCode,
        verifier: &str,
        options: &ExchangeOptions,
    ) -> Result<Attempt, AuthError> {
        let mut headers = default_headers();
        for (name, value) in &options.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        // replaces any client-wide timeout for this request
        let mut request = self
            .http
            .get(&self.endpoint)
            .timeout(options.timeout)
            .query(&[("code", code.as_str()), ("code_verifier", verifier)]);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match tokio::time::timeout(options.timeout, round_trip(request)).await {
            Ok(result) => result.map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout(options.timeout)
                } else {
                    AuthError::Network(e)
                }
            }),
            Err(_) => Err(AuthError::Timeout(options.timeout)),
        }
    }
}

async fn round_trip(request: reqwest::RequestBuilder) -> Result<Attempt, reqwest::Error> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(Attempt::Success(response.text().await?))
    } else {
        let body = response.text().await.unwrap_or_default();
        Ok(Attempt::Failure {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_token(attempt: u32, body: &str, options: &ExchangeOptions) -> ExchangeOutcome {
    let parsed: TokenResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(attempt, error = %e, "token endpoint returned malformed JSON");
            options.notify(ExchangeErrorEvent {
                attempt,
                status: Some(200),
                detail: ExchangeErrorDetail::InvalidJson,
            });
            return ExchangeOutcome::Empty(EmptyReason::InvalidJson);
        }
    };

    let token = parsed
        .data
        .and_then(|data| data.oauth_token)
        .filter(|token| parsed.success && !token.is_empty());

    match token {
        Some(token) => {
            let token = BearerToken::new(token);
            info!(token = %token.redacted(), "authorization code exchanged");
            ExchangeOutcome::Token(token)
        }
        None => {
            options.notify(ExchangeErrorEvent {
                attempt,
                status: Some(200),
                detail: ExchangeErrorDetail::NoToken,
            });
            ExchangeOutcome::Empty(EmptyReason::NoToken)
        }
    }
}

fn default_headers() -> BTreeMap<String, String> {
    [
        // the endpoint refuses requests without a browser-looking User-Agent
        ("user-agent", DESKTOP_USER_AGENT),
        ("accept", "application/json, text/plain, */*"),
        ("accept-language", "en-US,en;q=0.9"),
        ("referer", "https://streamlabs.com/slobs/login"),
        ("origin", "https://streamlabs.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
