//! Interactive login through a real browser.
//!
//! Launch → warm-up → login page → poll the current URL until the redirect
//! host shows up with a `code` → teardown. One deadline, taken on entry,
//! covers launch, warm-up and polling, whatever timeouts the driver has.

use super::flow::{Phase, ProgressEvent, ProgressObserver};
use super::{AuthError, AuthorizationCode};
use crate::http::DESKTOP_USER_AGENT;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Neutral page loaded before the login page
pub const WARMUP_URL: &str = "https://www.tiktok.com/transparency";

/// Host the login flow finally redirects to
pub const REDIRECT_HOST: &str = "streamlabs.com";

/// Upper bound on closing the browser once the capture is over
const QUIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the automated browser is started
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub user_agent: String,
    /// Dedicated user-data directory; cookies survive between captures
    pub profile_dir: Option<PathBuf>,
    pub browser_binary: Option<PathBuf>,
    pub driver_path: Option<PathBuf>,
}

/// Starts automated browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, AuthError>;
}

/// One running, remote-controlled browser window
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), AuthError>;

    async fn current_url(&mut self) -> Result<String, AuthError>;

    /// Close the window and stop the browser process
    async fn quit(self: Box<Self>) -> Result<(), AuthError>;
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub profile_dir: Option<PathBuf>,
    /// Leave the window up for `grace_period` after an error
    pub keep_open_on_error: bool,
    pub poll_interval: Duration,
    /// Hard ceiling on the whole capture, from launch to redirect
    pub timeout: Duration,
    /// `None` skips the warm-up navigation
    pub warmup_url: Option<String>,
    pub warmup_pause: Duration,
    pub grace_period: Duration,
    pub redirect_host: String,
    pub user_agent: String,
    pub browser_binary: Option<PathBuf>,
    pub driver_path: Option<PathBuf>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            profile_dir: None,
            keep_open_on_error: false,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
            warmup_url: Some(WARMUP_URL.to_string()),
            warmup_pause: Duration::from_secs(1),
            grace_period: Duration::from_secs(30),
            redirect_host: REDIRECT_HOST.to_string(),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            browser_binary: None,
            driver_path: None,
        }
    }
}

impl CaptureOptions {
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            user_agent: self.user_agent.clone(),
            profile_dir: self.profile_dir.clone(),
            browser_binary: self.browser_binary.clone(),
            driver_path: self.driver_path.clone(),
        }
    }
}

/// Capture an authorization code, or `None` if the user never finished
pub async fn capture(
    launcher: &dyn BrowserLauncher,
    login_url: &str,
    options: &CaptureOptions,
) -> Result<Option<AuthorizationCode>, AuthError> {
    capture_with_progress(launcher, login_url, options, &|_: &ProgressEvent| {}).await
}

/// [`capture`], reporting the transition into [`Phase::WaitingForLogin`]
pub async fn capture_with_progress(
    launcher: &dyn BrowserLauncher,
    login_url: &str,
    options: &CaptureOptions,
    observer: &dyn ProgressObserver,
) -> Result<Option<AuthorizationCode>, AuthError> {
    let deadline = Instant::now() + options.timeout;

    info!(profile = ?options.profile_dir, "launching browser for login");
    let mut session = match timeout_at(deadline, launcher.launch(&options.launch_options())).await {
        Ok(session) => session?,
        Err(_) => {
            info!(timeout = ?options.timeout, "browser did not start before the deadline");
            return Ok(None);
        }
    };

    let result = match timeout_at(deadline, drive(session.as_mut(), login_url, options, observer)).await {
        Ok(result) => result.map(Some),
        Err(_) => {
            info!(timeout = ?options.timeout, "login not completed before the deadline");
            Ok(None)
        }
    };

    if let Err(e) = &result {
        if options.keep_open_on_error {
            warn!(error = %e, grace = ?options.grace_period, "login failed, keeping browser open");
            tokio::time::sleep(options.grace_period).await;
        }
    }

    match timeout(QUIT_TIMEOUT, session.quit()).await {
        Ok(Ok(())) => {}
        // the user may already have closed the window
        Ok(Err(e)) => debug!(error = %e, "browser teardown failed"),
        Err(_) => warn!("browser teardown did not finish"),
    }

    result
}

async fn drive(
    session: &mut dyn BrowserSession,
    login_url: &str,
    options: &CaptureOptions,
    observer: &dyn ProgressObserver,
) -> Result<AuthorizationCode, AuthError> {
    if let Some(warmup) = &options.warmup_url {
        debug!(url = %warmup, "loading warm-up page");
        session.goto(warmup).await?;
        tokio::time::sleep(options.warmup_pause).await;
    }

    session.goto(login_url).await?;
    observer.on_progress(&ProgressEvent::new(
        Phase::WaitingForLogin,
        "Complete the login in the browser window",
    ));
    poll(session, options).await
}

async fn poll(
    session: &mut dyn BrowserSession,
    options: &CaptureOptions,
) -> Result<AuthorizationCode, AuthError> {
    loop {
        let current = session.current_url().await?;
        if let Some(code) = extract_code(&current, &options.redirect_host) {
            info!("authorization code captured");
            return Ok(code);
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// The `code` parameter of a URL on `redirect_host`, from the query or the fragment
pub fn extract_code(url: &str, redirect_host: &str) -> Option<AuthorizationCode> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let on_redirect = host == redirect_host || host.ends_with(&format!(".{}", redirect_host));
    if !on_redirect {
        return None;
    }

    let from_query = parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned());
    let from_fragment = || {
        let fragment = parsed.fragment()?;
        url::form_urlencoded::parse(fragment.trim_start_matches('?').as_bytes())
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
    };

    from_query
        .filter(|c| !c.is_empty())
        .or_else(|| from_fragment().filter(|c| !c.is_empty()))
        .map(AuthorizationCode::new)
}
