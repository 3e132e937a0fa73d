//! Login-to-broadcast scenarios against an in-process platform stub.

use crate::auth::capture::{capture, BrowserLauncher, BrowserSession, CaptureOptions, LaunchOptions};
use crate::auth::local_scan::{Platform, ScanEnv};
use crate::auth::{
    AuthError, AuthorizationCode, CodeExchanger, ExchangeOptions, LocalTokenScanner, PkceChallenge,
    ProgressEvent, TokenAcquirer,
};
use crate::config::ApiSettings;
use crate::streaming::{StartedStream, StreamClient, START_PATH};
use crate::test_support::{serve, StubServer};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct StubPlatform {
    /// Challenge the verifier must hash to
    challenge: Mutex<Option<String>>,
    issued: Mutex<Vec<String>>,
}

type Shared = Arc<StubPlatform>;

async fn token(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let expected = state.challenge.lock().unwrap().clone();
    let verifier = query.get("code_verifier").cloned().unwrap_or_default();
    let code = query.get("code").cloned().unwrap_or_default();

    if expected != Some(PkceChallenge::challenge_for(&verifier)) || code != "abc123" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "success": false })));
    }

    let token = "tok-e2e".to_string();
    state.issued.lock().unwrap().push(token.clone());
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": { "oauth_token": token } })),
    )
}

async fn start(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != "Bearer tok-e2e" {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    (
        StatusCode::OK,
        Json(json!({ "id": "s1", "rtmp": "rtmp://x", "key": "k1" })),
    )
}

async fn platform() -> (StubServer, Shared) {
    let state = Shared::default();
    let router = Router::new()
        .route(crate::auth::exchange::TOKEN_PATH, get(token))
        .route(START_PATH, post(start))
        .with_state(state.clone());
    (serve(router).await, state)
}

/// Browser that lands on the redirect carrying `abc123` once the login page
/// has been opened, and remembers that page's URL.
#[derive(Default)]
struct LoginBrowser {
    login_url: Arc<Mutex<Option<String>>>,
}

struct LoginSession {
    opened: Option<String>,
    login_url: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl BrowserLauncher for LoginBrowser {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, AuthError> {
        Ok(Box::new(LoginSession {
            opened: None,
            login_url: self.login_url.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for LoginSession {
    async fn goto(&mut self, url: &str) -> Result<(), AuthError> {
        if url.contains("/m/login") {
            *self.login_url.lock().unwrap() = Some(url.to_string());
        }
        self.opened = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, AuthError> {
        match &self.opened {
            Some(url) if url.contains("/m/login") => {
                Ok("https://streamlabs.com/tiktok/auth#code=abc123".to_string())
            }
            Some(url) => Ok(url.clone()),
            None => Ok("about:blank".to_string()),
        }
    }

    async fn quit(self: Box<Self>) -> Result<(), AuthError> {
        Ok(())
    }
}

fn fast_capture() -> CaptureOptions {
    CaptureOptions {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
        warmup_pause: Duration::from_millis(1),
        ..CaptureOptions::default()
    }
}

fn stream_client(base_url: &str) -> StreamClient {
    let settings = ApiSettings {
        base_url: base_url.to_string(),
        ..ApiSettings::default()
    };
    StreamClient::new(reqwest::Client::new(), &settings)
}

#[tokio::test]
async fn test_pkce_capture_exchange_start() {
    let (server, state) = platform().await;

    let pkce = PkceChallenge::generate();
    *state.challenge.lock().unwrap() = Some(pkce.challenge.clone());

    let login_url = format!(
        "https://streamlabs.com/m/login?tiktok&code_challenge={}",
        pkce.challenge
    );
    let code = capture(&LoginBrowser::default(), &login_url, &fast_capture())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, AuthorizationCode::new("abc123"));

    let token = CodeExchanger::new(reqwest::Client::new(), &server.base_url)
        .exchange(&code, &pkce.verifier, &ExchangeOptions::default())
        .await
        .into_result()
        .unwrap()
        .unwrap();

    let mut client = stream_client(&server.base_url);
    client.set_token(token);
    let started = client.start("My Stream", "gaming", Some("0")).await.unwrap();

    assert_eq!(
        started,
        StartedStream {
            stream_url: Some("rtmp://x".to_string()),
            stream_key: Some("k1".to_string()),
            stream_id: Some("s1".to_string()),
        }
    );
    assert_eq!(client.stream_id(), Some("s1"));
}

#[tokio::test]
async fn test_acquirer_sends_matching_verifier() {
    let (server, state) = platform().await;
    let browser = LoginBrowser::default();
    let login_url = browser.login_url.clone();

    // the stub learns the challenge from the login page the browser opened
    let expected = state.clone();
    let observer = move |event: &ProgressEvent| {
        if event.phase == crate::auth::Phase::ExchangingCode {
            let url = login_url.lock().unwrap().clone().unwrap_or_default();
            let challenge = url.rsplit("code_challenge=").next().map(str::to_string);
            *expected.challenge.lock().unwrap() = challenge;
        }
    };

    let scanner = LocalTokenScanner::new(Platform::Unsupported("test".into()), ScanEnv::default());
    let acquirer = TokenAcquirer::new(
        scanner,
        Arc::new(browser),
        CodeExchanger::new(reqwest::Client::new(), &server.base_url),
    )
    .with_capture_options(fast_capture());

    let token = acquirer.load_web_token(None, &observer).await.unwrap();
    assert_eq!(token.as_str(), "tok-e2e");
    assert_eq!(*state.issued.lock().unwrap(), vec!["tok-e2e".to_string()]);
}
