use super::types::{AccountInfo, Category, StartedStream};
use crate::auth::BearerToken;
use crate::config::ApiSettings;
use reqwest::multipart::Form;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const INFO_PATH: &str = "/api/v5/slobs/tiktok/info";
pub const START_PATH: &str = "/api/v5/slobs/tiktok/stream/start";
/// Followed by `/<stream id>/end`
pub const END_PATH_PREFIX: &str = "/api/v5/slobs/tiktok/stream";

/// The search endpoint rejects longer category queries
pub const MAX_QUERY_CHARS: usize = 25;

const DEFAULT_AUDIENCE: &str = "0";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Missing token")]
    Unauthenticated,

    #[error("A stream is already live (id {stream_id}); end it first")]
    SessionActive { stream_id: String },

    #[error("{operation} failed (HTTP {status})")]
    Http { operation: &'static str, status: u16 },

    #[error("{operation} returned an unreadable response: {reason}")]
    InvalidResponse { operation: &'static str, reason: String },

    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl StreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StartResponse {
    #[serde(default)]
    rtmp: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EndResponse {
    #[serde(default)]
    success: bool,
}

/// Stateful client holding one account's token and its live stream id.
/// Use one instance per account.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    device_platform: String,
    token: Option<BearerToken>,
    stream_id: Option<String>,
}

impl StreamClient {
    pub fn new(http: reqwest::Client, settings: &ApiSettings) -> Self {
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_agent: settings.user_agent.clone(),
            device_platform: settings.device_platform.clone(),
            token: None,
            stream_id: None,
        }
    }

    /// Replace the active token. No validation happens here.
    pub fn set_token(&mut self, token: BearerToken) {
        self.token = Some(token).filter(|t| !t.as_str().is_empty());
    }

    pub fn token(&self) -> Option<&BearerToken> {
        self.token.as_ref()
    }

    /// Restore a stream id persisted by an earlier run
    pub fn set_stream_id(&mut self, stream_id: Option<String>) {
        self.stream_id = stream_id.filter(|id| !id.is_empty());
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.stream_id.is_some()
    }

    /// Forget the active stream without contacting the platform
    pub fn reset(&mut self) {
        self.stream_id = None;
    }

    pub async fn get_info(&self) -> Result<AccountInfo, StreamError> {
        let token = self.token.as_ref().ok_or(StreamError::Unauthenticated)?;
        let response = self
            .authorized(self.http.get(self.url(INFO_PATH)), token)
            .send()
            .await?;
        let value: Value = read_json("Loading account info", response).await?;
        Ok(AccountInfo(value))
    }

    /// Category search. Without a token or a query there is nothing to search.
    pub async fn search(&self, query: &str) -> Result<Vec<Category>, StreamError> {
        let token = match &self.token {
            Some(token) if !query.is_empty() => token,
            _ => return Ok(Vec::new()),
        };

        let truncated: String = query.chars().take(MAX_QUERY_CHARS).collect();
        debug!(query = %truncated, "searching categories");
        let response = self
            .authorized(self.http.get(self.url(INFO_PATH)), token)
            .query(&[("category", truncated.as_str())])
            .send()
            .await?;
        let value: Value = read_json("Category search", response).await?;

        let mut categories: Vec<Category> = value["categories"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match serde_json::from_value(item.clone()) {
                        Ok(category) => Some(category),
                        Err(e) => {
                            warn!(error = %e, "skipping category that is not an object");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        categories.push(Category::other());
        Ok(categories)
    }

    /// Start a broadcast and remember its id
    pub async fn start(
        &mut self,
        title: &str,
        category: &str,
        audience_type: Option<&str>,
    ) -> Result<StartedStream, StreamError> {
        let token = self.token.as_ref().ok_or(StreamError::Unauthenticated)?;
        if let Some(stream_id) = &self.stream_id {
            return Err(StreamError::SessionActive {
                stream_id: stream_id.clone(),
            });
        }

        let form = Form::new()
            .text("title", title.to_string())
            .text("device_platform", self.device_platform.clone())
            .text("category", category.to_string())
            .text(
                "audience_type",
                audience_type
                    .filter(|a| !a.is_empty())
                    .unwrap_or(DEFAULT_AUDIENCE)
                    .to_string(),
            );

        let response = self
            .authorized(self.http.post(self.url(START_PATH)), token)
            .multipart(form)
            .send()
            .await?;
        let data: StartResponse = read_json("Starting the stream", response).await?;

        let (stream_url, stream_key) = match (non_empty(data.rtmp), non_empty(data.key)) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                warn!("start succeeded without stream credentials");
                return Ok(StartedStream::default());
            }
        };

        self.stream_id = data.id.and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        info!(stream_id = ?self.stream_id, "stream started");

        Ok(StartedStream {
            stream_url: Some(stream_url),
            stream_key: Some(stream_key),
            stream_id: self.stream_id.clone(),
        })
    }

    /// End the active broadcast. `false` without a token or a stream to end.
    pub async fn end(&mut self) -> Result<bool, StreamError> {
        let (token, stream_id) = match (&self.token, &self.stream_id) {
            (Some(token), Some(stream_id)) => (token, stream_id),
            _ => return Ok(false),
        };

        let path = format!("{}/{}/end", END_PATH_PREFIX, urlencoding::encode(stream_id));
        let response = self
            .authorized(self.http.post(self.url(&path)), token)
            .send()
            .await?;
        let data: EndResponse = read_json("Ending the stream", response).await?;

        if data.success {
            info!(stream_id = %stream_id, "stream ended");
            self.stream_id = None;
        } else {
            warn!(stream_id = %stream_id, "platform did not confirm the end of the stream");
        }
        Ok(data.success)
    }

    /// [`Self::end`], then forget the stream whatever the platform answered.
    /// Returns whether the platform confirmed the end.
    pub async fn force_end(&mut self) -> bool {
        let confirmed = match self.end().await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!(error = %e, stream_id = ?self.stream_id, "ending the stream failed, clearing it anyway");
                false
            }
        };
        self.reset();
        confirmed
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder, token: &BearerToken) -> reqwest::RequestBuilder {
        request
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .bearer_auth(token.as_str())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T, StreamError> {
    let status = response.status();
    if !status.is_success() {
        warn!(operation, status = status.as_u16(), "request rejected");
        return Err(StreamError::Http {
            operation,
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| StreamError::InvalidResponse {
        operation,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, StubServer};
    use axum::extract::{Multipart, Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Platform {
        calls: AtomicUsize,
        info_status: Mutex<Option<StatusCode>>,
        start_body: Mutex<Value>,
        end_success: Mutex<bool>,
        end_status: Mutex<Option<StatusCode>>,
        categories: Mutex<Option<Value>>,
        last_query: Mutex<Option<String>>,
        last_auth: Mutex<Option<String>>,
        last_form: Mutex<HashMap<String, String>>,
        ended: Mutex<Vec<String>>,
    }

    type Shared = Arc<Platform>;

    fn record_auth(state: &Platform, headers: &HeaderMap) {
        state.calls.fetch_add(1, Ordering::SeqCst);
        *state.last_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    async fn info(
        State(state): State<Shared>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        record_auth(&state, &headers);
        if let Some(status) = *state.info_status.lock().unwrap() {
            return (status, Json(json!({ "error": "nope" })));
        }
        match query.get("category") {
            Some(category) => {
                *state.last_query.lock().unwrap() = Some(category.clone());
                let categories = state.categories.lock().unwrap().clone().unwrap_or_else(|| {
                    json!([
                        { "full_name": "Gaming", "game_mask_id": "g1" },
                        { "full_name": "Just Chatting", "game_mask_id": "c1" }
                    ])
                });
                (StatusCode::OK, Json(json!({ "categories": categories })))
            }
            None => (
                StatusCode::OK,
                Json(json!({ "user": { "username": "creator" }, "can_be_live": true })),
            ),
        }
    }

    async fn start(State(state): State<Shared>, headers: HeaderMap, mut form: Multipart) -> Json<Value> {
        record_auth(&state, &headers);
        let mut fields = HashMap::new();
        while let Ok(Some(field)) = form.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let value = field.text().await.unwrap_or_default();
            fields.insert(name, value);
        }
        *state.last_form.lock().unwrap() = fields;
        Json(state.start_body.lock().unwrap().clone())
    }

    async fn end(
        State(state): State<Shared>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> (StatusCode, Json<Value>) {
        record_auth(&state, &headers);
        state.ended.lock().unwrap().push(id);
        if let Some(status) = *state.end_status.lock().unwrap() {
            return (status, Json(json!({ "error": "not found" })));
        }
        (
            StatusCode::OK,
            Json(json!({ "success": *state.end_success.lock().unwrap() })),
        )
    }

    async fn platform() -> (StubServer, Shared) {
        let state = Shared::default();
        *state.start_body.lock().unwrap() = json!({ "id": "s1", "rtmp": "rtmp://x", "key": "k1" });
        *state.end_success.lock().unwrap() = true;
        let router = Router::new()
            .route(INFO_PATH, get(info))
            .route(START_PATH, post(start))
            .route("/api/v5/slobs/tiktok/stream/:id/end", post(end))
            .with_state(state.clone());
        (serve(router).await, state)
    }

    fn client(base_url: &str) -> StreamClient {
        let settings = ApiSettings {
            base_url: base_url.to_string(),
            ..ApiSettings::default()
        };
        StreamClient::new(reqwest::Client::new(), &settings)
    }

    fn authed(base_url: &str) -> StreamClient {
        let mut client = client(base_url);
        client.set_token(BearerToken::new("tok"));
        client
    }

    #[tokio::test]
    async fn test_get_info_requires_token_before_network() {
        let (server, state) = platform().await;
        let err = client(&server.base_url).get_info().await.unwrap_err();
        assert!(matches!(err, StreamError::Unauthenticated));
        assert_eq!(state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_info_sends_bearer_token() {
        let (server, state) = platform().await;
        let info = authed(&server.base_url).get_info().await.unwrap();
        assert_eq!(info.username(), Some("creator"));
        assert_eq!(state.last_auth.lock().unwrap().as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_get_info_http_error_carries_status() {
        let (server, state) = platform().await;
        *state.info_status.lock().unwrap() = Some(StatusCode::UNAUTHORIZED);
        let err = authed(&server.base_url).get_info().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_set_token_replaces_previous() {
        let (server, state) = platform().await;
        let mut client = authed(&server.base_url);
        client.set_token(BearerToken::new("second"));
        client.get_info().await.unwrap();
        assert_eq!(state.last_auth.lock().unwrap().as_deref(), Some("Bearer second"));
    }

    #[tokio::test]
    async fn test_search_truncates_to_25_characters() {
        let (server, state) = platform().await;
        authed(&server.base_url)
            .search("12345678901234567890123456789")
            .await
            .unwrap();
        assert_eq!(
            state.last_query.lock().unwrap().as_deref(),
            Some("1234567890123456789012345")
        );
    }

    #[tokio::test]
    async fn test_search_truncates_by_character_not_byte() {
        let (server, state) = platform().await;
        let query = "é".repeat(30);
        authed(&server.base_url).search(&query).await.unwrap();
        assert_eq!(state.last_query.lock().unwrap().clone(), Some("é".repeat(25)));
    }

    #[tokio::test]
    async fn test_search_appends_other() {
        let (server, _) = platform().await;
        let categories = authed(&server.base_url).search("gam").await.unwrap();
        assert_eq!(categories.len(), 3);
        assert_eq!(categories[0].game_mask_id, "g1");
        assert_eq!(categories.last(), Some(&Category::other()));
    }

    #[tokio::test]
    async fn test_search_keeps_entries_with_odd_ids() {
        let (server, state) = platform().await;
        *state.categories.lock().unwrap() = Some(json!([
            { "full_name": "Music", "game_mask_id": null, "cover": "m.png" },
            { "full_name": "Sports", "game_mask_id": 42 },
            { "full_name": "Chat", "game_mask_id": "c1" },
            { "game_mask_id": "anon" }
        ]));

        let categories = authed(&server.base_url).search("mus").await.unwrap();
        let ids: Vec<&str> = categories.iter().map(|c| c.game_mask_id.as_str()).collect();
        assert_eq!(ids, vec!["", "42", "c1", "anon", ""]);
        assert_eq!(categories[0].full_name, "Music");
        assert_eq!(categories[0].extra["cover"], "m.png");
        assert_eq!(categories[3].full_name, "");
        assert_eq!(categories.last(), Some(&Category::other()));
    }

    #[tokio::test]
    async fn test_search_without_token_or_query_is_empty() {
        let (server, state) = platform().await;
        assert!(client(&server.base_url).search("gaming").await.unwrap().is_empty());
        assert!(authed(&server.base_url).search("").await.unwrap().is_empty());
        assert_eq!(state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_http_error_is_raised() {
        let (server, state) = platform().await;
        *state.info_status.lock().unwrap() = Some(StatusCode::BAD_GATEWAY);
        let err = authed(&server.base_url).search("gaming").await.unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn test_start_posts_form_and_tracks_id() {
        let (server, state) = platform().await;
        let mut client = authed(&server.base_url);

        let started = client.start("My Stream", "gaming", None).await.unwrap();
        assert_eq!(
            started,
            StartedStream {
                stream_url: Some("rtmp://x".to_string()),
                stream_key: Some("k1".to_string()),
                stream_id: Some("s1".to_string()),
            }
        );
        assert_eq!(client.stream_id(), Some("s1"));
        assert!(client.is_live());

        let form = state.last_form.lock().unwrap();
        assert_eq!(form["title"], "My Stream");
        assert_eq!(form["category"], "gaming");
        assert_eq!(form["device_platform"], "win32");
        assert_eq!(form["audience_type"], "0");
    }

    #[tokio::test]
    async fn test_start_with_empty_payload_returns_nulls() {
        let (server, state) = platform().await;
        *state.start_body.lock().unwrap() = json!({});
        let mut client = authed(&server.base_url);

        let started = client.start("a", "b", Some("0")).await.unwrap();
        assert!(started.is_empty());
        assert_eq!(client.stream_id(), None);
    }

    #[tokio::test]
    async fn test_start_while_live_is_rejected_without_network() {
        let (server, state) = platform().await;
        let mut client = authed(&server.base_url);
        client.set_stream_id(Some("old".to_string()));

        let err = client.start("a", "b", None).await.unwrap_err();
        assert!(matches!(err, StreamError::SessionActive { ref stream_id } if stream_id == "old"));
        assert_eq!(state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_requires_token() {
        let (server, _) = platform().await;
        let err = client(&server.base_url).start("a", "b", None).await.unwrap_err();
        assert!(matches!(err, StreamError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_end_without_token_or_stream_is_noop() {
        let (server, state) = platform().await;
        assert!(!client(&server.base_url).end().await.unwrap());
        assert!(!authed(&server.base_url).end().await.unwrap());

        let mut no_token = client(&server.base_url);
        no_token.set_stream_id(Some("s1".to_string()));
        assert!(!no_token.end().await.unwrap());

        assert_eq!(state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_uses_restored_stream_id_and_clears_it() {
        let (server, state) = platform().await;
        let mut client = authed(&server.base_url);
        client.set_stream_id(Some("restored-9".to_string()));

        assert!(client.end().await.unwrap());
        assert_eq!(*state.ended.lock().unwrap(), vec!["restored-9".to_string()]);
        assert_eq!(client.stream_id(), None);
    }

    #[tokio::test]
    async fn test_unconfirmed_end_keeps_stream_id() {
        let (server, state) = platform().await;
        *state.end_success.lock().unwrap() = false;
        let mut client = authed(&server.base_url);
        client.set_stream_id(Some("s1".to_string()));

        assert!(!client.end().await.unwrap());
        assert_eq!(client.stream_id(), Some("s1"));
    }

    #[tokio::test]
    async fn test_force_end_clears_stale_stream() {
        let (server, state) = platform().await;
        *state.end_status.lock().unwrap() = Some(StatusCode::NOT_FOUND);
        let mut client = authed(&server.base_url);
        client.set_stream_id(Some("stale".to_string()));

        let err = client.end().await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(client.stream_id(), Some("stale"));
        assert!(matches!(
            client.start("a", "b", None).await.unwrap_err(),
            StreamError::SessionActive { .. }
        ));

        assert!(!client.force_end().await);
        assert_eq!(client.stream_id(), None);
        assert_eq!(*state.ended.lock().unwrap(), vec!["stale".to_string(), "stale".to_string()]);

        let started = client.start("a", "b", None).await.unwrap();
        assert_eq!(started.stream_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_force_end_reports_confirmed_end() {
        let (server, _) = platform().await;
        let mut client = authed(&server.base_url);
        client.set_stream_id(Some("s1".to_string()));

        assert!(client.force_end().await);
        assert!(!client.is_live());
    }
}
