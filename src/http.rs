//! HTTP client construction
//!
//! One `reqwest::Client` serves the token endpoint, the LIVE endpoints and
//! the driver download. Proxies come from the usual environment variables:
//! - HTTPS_PROXY / https_proxy
//! - HTTP_PROXY / http_proxy
//! - ALL_PROXY / all_proxy (fallback for both schemes)
//! - NO_PROXY / no_proxy

use crate::config::ApiSettings;
use reqwest::{Client, Proxy};
use url::Url;

/// Identity of the desktop streaming app; the platform rejects bare clients
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) StreamlabsDesktop/1.17.0 Chrome/122.0.6261.156 Electron/29.3.1 Safari/537.36";

/// Client for the platform API with the configured timeout and identity
pub fn api_client(settings: &ApiSettings) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(settings.request_timeout())
        .user_agent(settings.user_agent.as_str());

    let proxies = ProxyEnv::from_env();
    if proxies.is_configured() {
        builder = builder.proxy(Proxy::custom(move |url: &Url| proxies.select(url)));
    }

    builder.build()
}

#[derive(Debug, Clone, Default)]
struct ProxyEnv {
    https: Option<String>,
    http: Option<String>,
    bypass: Vec<NoProxyRule>,
}

impl ProxyEnv {
    fn from_env() -> Self {
        let all = getenv_first(&["ALL_PROXY", "all_proxy"]);
        Self {
            https: getenv_first(&["HTTPS_PROXY", "https_proxy"]).or_else(|| all.clone()),
            http: getenv_first(&["HTTP_PROXY", "http_proxy"]).or(all),
            bypass: parse_no_proxy(&getenv_first(&["NO_PROXY", "no_proxy"]).unwrap_or_default()),
        }
    }

    fn is_configured(&self) -> bool {
        self.https.is_some() || self.http.is_some()
    }

    /// Proxy for `url`, honouring per-scheme settings and NO_PROXY
    fn select(&self, url: &Url) -> Option<String> {
        let host = url.host_str().unwrap_or("");
        if self.bypasses(host) {
            return None;
        }
        let (preferred, fallback) = match url.scheme() {
            "https" => (&self.https, &self.http),
            "http" => (&self.http, &self.https),
            _ => return None,
        };
        preferred.clone().or_else(|| fallback.clone())
    }

    fn bypasses(&self, host: &str) -> bool {
        if host.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        self.bypass.iter().any(|rule| match rule {
            NoProxyRule::Wildcard => true,
            NoProxyRule::Exact(exact) => host == *exact,
            NoProxyRule::Domain(suffix) => host == *suffix || host.ends_with(&format!(".{}", suffix)),
        })
    }
}

fn getenv_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxyRule {
    Wildcard,
    /// Host or any subdomain
    Domain(String),
    /// Exact host: localhost and IP literals
    Exact(String),
}

fn parse_no_proxy(value: &str) -> Vec<NoProxyRule> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            let token = token.to_ascii_lowercase();
            if token == "*" {
                NoProxyRule::Wildcard
            } else if let Some(domain) = token.strip_prefix('.') {
                NoProxyRule::Domain(domain.to_string())
            } else if token == "localhost" || token.parse::<std::net::IpAddr>().is_ok() {
                NoProxyRule::Exact(token)
            } else {
                NoProxyRule::Domain(token)
            }
        })
        .collect()
}
