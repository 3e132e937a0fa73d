//! Minimal W3C WebDriver client for ChromeDriver.
//!
//! Only what the login capture needs: new session, navigate, current URL and
//! delete session.

use super::capture::{BrowserLauncher, BrowserSession, LaunchOptions};
use super::driver_setup::DriverInstall;
use super::AuthError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// How long a freshly spawned driver gets to answer `/status`
const DRIVER_STARTUP: Duration = Duration::from_secs(15);

/// W3C timeouts applied to every new session, in milliseconds
const IMPLICIT_WAIT_MS: u64 = 0;
const PAGE_LOAD_MS: u64 = 600_000;
const SCRIPT_MS: u64 = 600_000;

/// `capabilities` body for a Chrome session that does not announce automation
pub fn chrome_capabilities(options: &LaunchOptions) -> Value {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--start-maximized".to_string(),
        format!("--user-agent={}", options.user_agent),
    ];
    if let Some(profile) = &options.profile_dir {
        args.push(format!("--user-data-dir={}", profile.display()));
    }

    let mut chrome = json!({
        "args": args,
        "excludeSwitches": ["enable-automation"],
        "useAutomationExtension": false,
    });
    if let Some(binary) = &options.browser_binary {
        chrome["binary"] = json!(binary.display().to_string());
    }

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": chrome,
                "timeouts": {
                    "implicit": IMPLICIT_WAIT_MS,
                    "pageLoad": PAGE_LOAD_MS,
                    "script": SCRIPT_MS,
                },
            }
        }
    })
}

/// Spawns ChromeDriver and opens one browser session per launch
pub struct ChromeDriverLauncher {
    install: DriverInstall,
    http: reqwest::Client,
}

impl ChromeDriverLauncher {
    pub fn new(install: DriverInstall) -> Result<Self, AuthError> {
        // the driver listens on loopback; never route it through a proxy
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { install, http })
    }
}

#[async_trait]
impl BrowserLauncher for ChromeDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, AuthError> {
        let driver_path = self.install.locate(options.driver_path.as_deref())?;
        let port = free_port()?;

        info!(driver = %driver_path.display(), port, "starting chromedriver");
        let child = Command::new(&driver_path)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let base_url = format!("http://127.0.0.1:{}", port);
        let mut driver = DriverProcess { child };
        wait_ready(&self.http, &base_url, &mut driver).await?;

        let session = WebDriverSession::create(self.http.clone(), base_url, options, Some(driver)).await?;
        Ok(Box::new(session))
    }
}

struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    fn exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

fn free_port() -> Result<u16, AuthError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

async fn wait_ready(
    http: &reqwest::Client,
    base_url: &str,
    driver: &mut DriverProcess,
) -> Result<(), AuthError> {
    let deadline = Instant::now() + DRIVER_STARTUP;
    let status_url = format!("{}/status", base_url);

    loop {
        if driver.exited() {
            return Err(AuthError::Automation("chromedriver exited during startup".to_string()));
        }

        if let Ok(response) = http.get(&status_url).send().await {
            if let Ok(body) = response.json::<Value>().await {
                if body["value"]["ready"].as_bool().unwrap_or(false) {
                    debug!("chromedriver ready");
                    return Ok(());
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(AuthError::Automation(format!(
                "chromedriver did not become ready within {:?}",
                DRIVER_STARTUP
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// One WebDriver session, plus the driver process when we spawned it
pub struct WebDriverSession {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
    driver: Option<DriverProcess>,
}

impl WebDriverSession {
    async fn create(
        http: reqwest::Client,
        base_url: String,
        options: &LaunchOptions,
        driver: Option<DriverProcess>,
    ) -> Result<Self, AuthError> {
        let value = send(
            &http,
            Method::POST,
            &format!("{}/session", base_url),
            Some(chrome_capabilities(options)),
        )
        .await?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| AuthError::Automation("new session response lacks sessionId".to_string()))?
            .to_string();
        debug!(session = %session_id, "webdriver session created");

        Ok(Self {
            http,
            base_url,
            session_id,
            driver,
        })
    }

    /// Open a session on a driver that is already running at `base_url`
    pub async fn connect(
        http: reqwest::Client,
        base_url: impl Into<String>,
        options: &LaunchOptions,
    ) -> Result<Self, AuthError> {
        Self::create(http, base_url.into(), options, None).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn url(&self, command: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, command)
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), AuthError> {
        debug!(url, "navigating");
        send(&self.http, Method::POST, &self.url("/url"), Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, AuthError> {
        let value = send(&self.http, Method::GET, &self.url("/url"), None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AuthError::Automation("current URL is not a string".to_string()))
    }

    async fn quit(self: Box<Self>) -> Result<(), AuthError> {
        let mut this = self;
        let result = send(&this.http, Method::DELETE, &this.url(""), None).await;
        if let Some(mut driver) = this.driver.take() {
            let _ = driver.child.kill().await;
        }
        result.map(|_| ())
    }
}

/// Run one WebDriver command and unwrap its `value`
async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, AuthError> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let mut body: Value = response.json().await?;
    let value = body["value"].take();

    if status.is_success() {
        return Ok(value);
    }

    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or_default();
    Err(AuthError::Automation(format!(
        "{} (HTTP {}): {}",
        error,
        status.as_u16(),
        message
    )))
}
