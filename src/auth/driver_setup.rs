//! Locating and installing the ChromeDriver binary.

use super::AuthError;
use crate::http::DESKTOP_USER_AGENT;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Chrome-for-Testing manifest of every known-good build
pub const KNOWN_GOOD_URL: &str =
    "https://googlechromelabs.github.io/chrome-for-testing/known-good-versions-with-downloads.json";

/// Pinned driver build; the newest build of the same major is the fallback
pub const DEFAULT_DRIVER_VERSION: &str = "144.0.7559.133";

/// Anything smaller is an error page, not an archive
const MIN_ARCHIVE_BYTES: usize = 1000;

#[cfg(windows)]
const DRIVER_FILE: &str = "chromedriver.exe";
#[cfg(not(windows))]
const DRIVER_FILE: &str = "chromedriver";

/// Chrome-for-Testing platform name of this host
pub fn host_platform() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", "x86") => "win32",
        ("windows", _) => "win64",
        ("macos", "aarch64") => "mac-arm64",
        ("macos", _) => "mac-x64",
        _ => "linux64",
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    versions: Vec<ManifestVersion>,
}

#[derive(Debug, Deserialize)]
struct ManifestVersion {
    version: String,
    #[serde(default)]
    downloads: Downloads,
}

#[derive(Debug, Default, Deserialize)]
struct Downloads {
    #[serde(default)]
    chromedriver: Vec<Download>,
}

#[derive(Debug, Clone, Deserialize)]
struct Download {
    platform: String,
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled(PathBuf),
    Installed { path: PathBuf, version: String },
}

/// The application's own driver directory
#[derive(Debug, Clone)]
pub struct DriverInstall {
    dir: PathBuf,
    manifest_url: String,
    version: String,
    platform: String,
}

impl DriverInstall {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifest_url: KNOWN_GOOD_URL.to_string(),
            version: DEFAULT_DRIVER_VERSION.to_string(),
            platform: host_platform().to_string(),
        }
    }

    /// `<data dir>/tiklive/drivers`
    pub fn default_location() -> Result<Self, AuthError> {
        let data = dirs::data_dir()
            .ok_or_else(|| AuthError::DriverSetup("Cannot determine data directory".to_string()))?;
        Ok(Self::new(data.join("tiklive").join("drivers")))
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where an extracted archive leaves the binary
    pub fn bundled_path(&self) -> PathBuf {
        self.dir
            .join(format!("chromedriver-{}", self.platform))
            .join(DRIVER_FILE)
    }

    pub fn is_installed(&self) -> bool {
        self.bundled_path().is_file()
    }

    /// Explicit path, then the bundled binary, then `PATH`
    pub fn locate(&self, explicit: Option<&Path>) -> Result<PathBuf, AuthError> {
        self.locate_with_path(explicit, std::env::var_os("PATH"))
    }

    fn locate_with_path(
        &self,
        explicit: Option<&Path>,
        path_var: Option<OsString>,
    ) -> Result<PathBuf, AuthError> {
        let mut searched = Vec::new();

        if let Some(explicit) = explicit {
            if explicit.is_file() {
                return Ok(explicit.to_path_buf());
            }
            searched.push(explicit.display().to_string());
        }

        let bundled = self.bundled_path();
        if bundled.is_file() {
            return Ok(bundled);
        }
        searched.push(bundled.display().to_string());

        if let Some(path_var) = path_var {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join(DRIVER_FILE);
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "using chromedriver from PATH");
                    return Ok(candidate);
                }
            }
        }
        searched.push("PATH".to_string());

        Err(AuthError::DriverMissing {
            searched: searched.join(", "),
        })
    }

    /// Download and extract the pinned driver unless it is already present
    pub async fn install(
        &self,
        http: &reqwest::Client,
        progress: impl Fn(&str),
    ) -> Result<InstallOutcome, AuthError> {
        if self.is_installed() {
            return Ok(InstallOutcome::AlreadyInstalled(self.bundled_path()));
        }
        fs::create_dir_all(&self.dir)?;

        progress("Fetching version manifest");
        let manifest: Manifest = http
            .get(&self.manifest_url)
            .header(reqwest::header::USER_AGENT, DESKTOP_USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AuthError::DriverSetup(format!("Manifest parse error: {}", e)))?;

        let (version, download) = self.pick(&manifest)?;

        progress(&format!("Downloading chromedriver {}", version));
        info!(version = %version, url = %download.url, "downloading chromedriver");
        let response = http
            .get(&download.url)
            .header(reqwest::header::USER_AGENT, DESKTOP_USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::DriverSetup(format!("Download failed: HTTP {}", status.as_u16())));
        }
        let archive = response.bytes().await?;

        if archive.len() < MIN_ARCHIVE_BYTES {
            let head: String = String::from_utf8_lossy(&archive).chars().take(100).collect();
            return Err(AuthError::DriverSetup(format!(
                "Download failed: file too small ({} bytes): {}",
                archive.len(),
                head
            )));
        }

        progress("Extracting archive");
        let mut zip = zip::ZipArchive::new(Cursor::new(archive.as_ref()))
            .map_err(|e| AuthError::DriverSetup(format!("Extraction failed: {}", e)))?;
        zip.extract(&self.dir)
            .map_err(|e| AuthError::DriverSetup(format!("Extraction failed: {}", e)))?;

        let path = self.bundled_path();
        if !path.is_file() {
            return Err(AuthError::DriverSetup(format!(
                "Archive did not contain {}",
                path.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
        }

        progress("ChromeDriver ready");
        Ok(InstallOutcome::Installed { path, version })
    }

    fn pick(&self, manifest: &Manifest) -> Result<(String, Download), AuthError> {
        let major_prefix = format!("{}.", self.version.split('.').next().unwrap_or_default());
        let matched = manifest
            .versions
            .iter()
            .find(|v| v.version == self.version)
            .or_else(|| {
                manifest
                    .versions
                    .iter()
                    .filter(|v| v.version.starts_with(&major_prefix))
                    .last()
            })
            .ok_or_else(|| {
                AuthError::DriverSetup(format!("No matching ChromeDriver for version {}", self.version))
            })?;

        let downloads = &matched.downloads.chromedriver;
        let download = downloads
            .iter()
            .find(|d| d.platform == self.platform)
            .or_else(|| downloads.first())
            .ok_or_else(|| {
                AuthError::DriverSetup(format!("No ChromeDriver downloads for {}", matched.version))
            })?;

        Ok((matched.version.clone(), download.clone()))
    }
}
