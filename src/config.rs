//! Persistent settings.
//!
//! Stored as pretty JSON at `<config dir>/tiklive/settings.json`. A missing
//! file means defaults; unknown keys are rejected so typos surface.

use crate::auth::capture::{CaptureOptions, REDIRECT_HOST, WARMUP_URL};
use crate::auth::exchange::ExchangeOptions;
use crate::http::DESKTOP_USER_AGENT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api: ApiSettings,
    pub exchange: ExchangeSettings,
    pub capture: CaptureSettings,
    pub scanner: ScannerSettings,
    pub stream: StreamSettings,
}

/// Remote API endpoint and request identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub base_url: String,
    pub user_agent: String,
    pub device_platform: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://streamlabs.com".to_string(),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            device_platform: "win32".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Serialisable part of [`ExchangeOptions`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeSettings {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_statuses: BTreeSet<u16>,
    pub retry_delay_ms: u64,
    pub headers: BTreeMap<String, String>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        let defaults = ExchangeOptions::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            retries: defaults.retries,
            retry_statuses: defaults.retry_statuses,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            headers: defaults.headers,
        }
    }
}

impl ExchangeSettings {
    pub fn to_options(&self) -> ExchangeOptions {
        ExchangeOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            retry_statuses: self.retry_statuses.clone(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            headers: self.headers.clone(),
            on_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSettings {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    /// Empty disables the warm-up navigation
    pub warmup_url: String,
    pub warmup_pause_ms: u64,
    pub grace_period_secs: u64,
    pub redirect_host: String,
    pub keep_open_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_binary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_path: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            timeout_secs: 600,
            warmup_url: WARMUP_URL.to_string(),
            warmup_pause_ms: 1_000,
            grace_period_secs: 30,
            redirect_host: REDIRECT_HOST.to_string(),
            keep_open_on_error: false,
            browser_binary: None,
            driver_path: None,
        }
    }
}

impl CaptureSettings {
    pub fn to_options(&self, user_agent: &str) -> CaptureOptions {
        CaptureOptions {
            profile_dir: None,
            keep_open_on_error: self.keep_open_on_error,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.timeout_secs),
            warmup_url: Some(self.warmup_url.clone()).filter(|u| !u.is_empty()),
            warmup_pause: Duration::from_millis(self.warmup_pause_ms),
            grace_period: Duration::from_secs(self.grace_period_secs),
            redirect_host: self.redirect_host.clone(),
            user_agent: user_agent.to_string(),
            browser_binary: self.browser_binary.clone(),
            driver_path: self.driver_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerSettings {
    /// Replaces the platform's storage directories when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_dirs: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSettings {
    /// Live stream id per account id, restored on the next run
    pub last_stream_id: BTreeMap<String, String>,
}

/// `<config dir>/tiklive/settings.json`
pub fn settings_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
    Ok(config_dir.join("tiklive").join(SETTINGS_FILE))
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&settings_path()?)
    }

    /// Write with user-only permissions
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let data = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, data).context("Failed to write settings file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}
