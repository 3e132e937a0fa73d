//! Discovery of a bearer token already persisted on this machine.
//!
//! The desktop streaming app and Chromium-based browsers keep their local
//! storage in LevelDB directories. Those files are append-only logs, so the
//! scanner reads every candidate file newest-first and takes the *last*
//! `"apiToken":"<hex>"` occurrence of the first file that has one.

use super::BearerToken;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extensions of LevelDB log and table files
const STORAGE_EXTENSIONS: &[&str] = &["log", "ldb"];

const TOKEN_PATTERN: &str = r#"(?i)"apiToken":"([a-f0-9]+)""#;

fn token_pattern() -> Result<&'static Regex, ScanError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(TOKEN_PATTERN))
        .as_ref()
        .map_err(|e| ScanError::Pattern(e.to_string()))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Unsupported operating system for local token retrieval ({0})")]
    UnsupportedPlatform(String),

    #[error("No API Token found locally in {searched} location(s). Make sure Streamlabs is installed or you are logged in to Streamlabs in your browser.")]
    NotFound { searched: usize },

    #[error("Local token scan did not complete: {0}")]
    Task(String),

    #[error("Token pattern failed to compile: {0}")]
    Pattern(String),
}

/// Host platform as far as storage locations are concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    /// Linux under WSL, reading the Windows side's app data
    Wsl,
    Unsupported(String),
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            "linux" if is_wsl() => Platform::Wsl,
            other => Platform::Unsupported(other.to_string()),
        }
    }
}

fn is_wsl() -> bool {
    fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

/// Environment inputs used to build the candidate list
#[derive(Debug, Clone, Default)]
pub struct ScanEnv {
    pub appdata: Option<PathBuf>,
    pub local_appdata: Option<PathBuf>,
    pub home: Option<PathBuf>,
}

impl ScanEnv {
    pub fn from_process() -> Self {
        Self {
            appdata: std::env::var_os("APPDATA").map(PathBuf::from),
            local_appdata: std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
            home: dirs::home_dir(),
        }
    }
}

/// Filesystem operations the scanner performs
pub trait StorageFs: Send + Sync {
    fn exists(&self, dir: &Path) -> bool;
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`StorageFs`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl StorageFs for RealFs {
    fn exists(&self, dir: &Path) -> bool {
        dir.is_dir()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

#[derive(Clone)]
pub struct LocalTokenScanner {
    platform: Platform,
    env: ScanEnv,
    candidate_override: Option<Vec<PathBuf>>,
    fs: Arc<dyn StorageFs>,
}

impl LocalTokenScanner {
    pub fn new(platform: Platform, env: ScanEnv) -> Self {
        Self {
            platform,
            env,
            candidate_override: None,
            fs: Arc::new(RealFs),
        }
    }

    pub fn for_current_platform() -> Self {
        Self::new(Platform::current(), ScanEnv::from_process())
    }

    /// Replace the platform list. Overrides are honoured on any platform.
    pub fn with_candidate_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.candidate_override = Some(dirs);
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn StorageFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Priority-ordered storage directories: the desktop app first, then browsers
    pub fn candidate_dirs(&self) -> Result<Vec<PathBuf>, ScanError> {
        if let Some(dirs) = &self.candidate_override {
            return Ok(dirs.clone());
        }

        let leveldb = |base: &Path| base.join("Local Storage").join("leveldb");
        let mut dirs = Vec::new();

        match &self.platform {
            Platform::Windows => {
                if let Some(appdata) = &self.env.appdata {
                    dirs.push(leveldb(&appdata.join("slobs-client")));
                }
                if let Some(local) = &self.env.local_appdata {
                    for browser in [
                        &["Google", "Chrome"][..],
                        &["BraveSoftware", "Brave-Browser"][..],
                        &["Microsoft", "Edge"][..],
                    ] {
                        let mut profile = local.clone();
                        profile.extend(browser);
                        dirs.push(leveldb(&profile.join("User Data").join("Default")));
                    }
                }
            }
            Platform::MacOs => {
                if let Some(home) = &self.env.home {
                    let support = home.join("Library").join("Application Support");
                    dirs.push(leveldb(&support.join("slobs-client")));
                    dirs.push(leveldb(&support.join("Google").join("Chrome").join("Default")));
                }
            }
            Platform::Wsl => {
                if let Some(appdata) = windows_appdata_from_wsl() {
                    dirs.push(leveldb(&appdata.join("slobs-client")));
                }
            }
            Platform::Unsupported(os) => return Err(ScanError::UnsupportedPlatform(os.clone())),
        }

        Ok(dirs)
    }

    /// Blocking scan; see the module docs for the search order
    pub fn scan(&self) -> Result<BearerToken, ScanError> {
        let dirs = self.candidate_dirs()?;
        let pattern = token_pattern()?;

        for dir in &dirs {
            if !self.fs.exists(dir) {
                debug!(dir = %dir.display(), "storage directory absent");
                continue;
            }

            for file in self.storage_files(dir) {
                let raw = match self.fs.read(&file) {
                    Ok(raw) => raw,
                    Err(e) => {
                        // usually locked by the running app
                        debug!(file = %file.display(), error = %e, "skipping unreadable storage file");
                        continue;
                    }
                };

                if let Some(token) = last_token_in(pattern, &raw) {
                    info!(file = %file.display(), token = %token.redacted(), "found local API token");
                    return Ok(token);
                }
            }
        }

        warn!(searched = dirs.len(), "no local API token found");
        Err(ScanError::NotFound {
            searched: dirs.len(),
        })
    }

    /// [`Self::scan`] on the blocking pool, keeping async callers responsive
    pub async fn scan_blocking_task(&self) -> Result<BearerToken, ScanError> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }

    /// LevelDB files in `dir`, newest first
    fn storage_files(&self, dir: &Path) -> Vec<PathBuf> {
        let entries = match self.fs.list_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot list storage directory");
                return Vec::new();
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .into_iter()
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| STORAGE_EXTENSIONS.contains(&ext))
            })
            .map(|path| {
                let modified = self.fs.modified(&path).unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();

        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.into_iter().map(|(_, path)| path).collect()
    }
}

/// Last token occurrence in a storage file, NUL bytes removed first
fn last_token_in(pattern: &Regex, raw: &[u8]) -> Option<BearerToken> {
    let cleaned: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    let text = String::from_utf8_lossy(&cleaned);
    pattern
        .captures_iter(&text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| BearerToken::new(m.as_str()))
}

fn windows_appdata_from_wsl() -> Option<PathBuf> {
    let output = std::process::Command::new("cmd.exe")
        .args(["/c", "echo %APPDATA%"])
        .output()
        .ok()?;
    let appdata = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if appdata.is_empty() {
        return None;
    }

    let output = std::process::Command::new("wslpath")
        .arg(&appdata)
        .output()
        .ok()?;
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn slobs_dir(appdata: &Path) -> PathBuf {
        let dir = appdata.join("slobs-client").join("Local Storage").join("leveldb");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_aged(path: &Path, contents: &[u8], age: Duration) {
        fs::write(path, contents).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn windows_scanner(appdata: &Path) -> LocalTokenScanner {
        LocalTokenScanner::new(
            Platform::Windows,
            ScanEnv {
                appdata: Some(appdata.to_path_buf()),
                ..ScanEnv::default()
            },
        )
    }

    #[test]
    fn test_token_pattern_compiles_and_is_case_insensitive() {
        let pattern = token_pattern().unwrap();
        let token = last_token_in(pattern, br#"{"APITOKEN":"ABC123"}"#).unwrap();
        assert_eq!(token.as_str(), "ABC123");
    }

    #[test]
    fn test_newest_file_wins() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(&dir.join("0001.log"), br#""apiToken":"aaa111""#, Duration::from_secs(10));
        write_aged(&dir.join("0002.log"), br#""apiToken":"bbb222""#, Duration::from_secs(0));

        let token = windows_scanner(tmp.path()).scan().unwrap();
        assert_eq!(token.as_str(), "bbb222");
    }

    #[test]
    fn test_newest_file_wins_regardless_of_name_order() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(&dir.join("0001.ldb"), br#""apiToken":"ccc333""#, Duration::from_secs(0));
        write_aged(&dir.join("0002.log"), br#""apiToken":"ddd444""#, Duration::from_secs(60));

        let token = windows_scanner(tmp.path()).scan().unwrap();
        assert_eq!(token.as_str(), "ccc333");
    }

    #[test]
    fn test_last_match_in_file_wins() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(
            &dir.join("000003.log"),
            br#"junk"apiToken":"0ld0ld"more junk"apiToken":"new123"tail"#,
            Duration::from_secs(0),
        );

        let token = windows_scanner(tmp.path()).scan().unwrap();
        assert_eq!(token.as_str(), "new123");
    }

    #[test]
    fn test_nul_bytes_are_stripped() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(
            &dir.join("000003.log"),
            b"\x00\"api\x00Token\":\"ab\x00cd\"\x00",
            Duration::from_secs(0),
        );

        let token = windows_scanner(tmp.path()).scan().unwrap();
        assert_eq!(token.as_str(), "abcd");
    }

    #[test]
    fn test_other_extensions_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(&dir.join("LOG.old"), br#""apiToken":"eee555""#, Duration::from_secs(0));
        write_aged(&dir.join("notes.txt"), br#""apiToken":"fff666""#, Duration::from_secs(0));

        let err = windows_scanner(tmp.path()).scan().unwrap_err();
        assert!(matches!(err, ScanError::NotFound { .. }));
    }

    #[test]
    fn test_no_files_reports_descriptive_error() {
        let tmp = TempDir::new().unwrap();
        slobs_dir(tmp.path());

        let err = windows_scanner(tmp.path()).scan().unwrap_err();
        assert!(err.to_string().contains("No API Token"));
    }

    #[test]
    fn test_missing_directories_report_not_found() {
        let tmp = TempDir::new().unwrap();
        let scanner = LocalTokenScanner::new(
            Platform::Windows,
            ScanEnv {
                appdata: Some(tmp.path().join("nowhere")),
                local_appdata: Some(tmp.path().join("also-nowhere")),
                home: None,
            },
        );

        assert_eq!(scanner.scan().unwrap_err(), ScanError::NotFound { searched: 4 });
    }

    #[test]
    fn test_earlier_directory_short_circuits() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        write_aged(&first.join("1.log"), br#""apiToken":"aaaa""#, Duration::from_secs(100));
        write_aged(&second.join("1.log"), br#""apiToken":"bbbb""#, Duration::from_secs(0));

        let scanner = LocalTokenScanner::new(Platform::Unsupported("plan9".into()), ScanEnv::default())
            .with_candidate_dirs(vec![first, second]);
        assert_eq!(scanner.scan().unwrap().as_str(), "aaaa");
    }

    #[test]
    fn test_windows_candidate_order() {
        let scanner = LocalTokenScanner::new(
            Platform::Windows,
            ScanEnv {
                appdata: Some(PathBuf::from("/A")),
                local_appdata: Some(PathBuf::from("/L")),
                home: None,
            },
        );
        let dirs = scanner.candidate_dirs().unwrap();
        assert_eq!(dirs.len(), 4);
        assert!(dirs[0].starts_with("/A/slobs-client"));
        assert!(dirs[1].to_string_lossy().contains("Chrome"));
        assert!(dirs[2].to_string_lossy().contains("Brave-Browser"));
        assert!(dirs[3].to_string_lossy().contains("Edge"));
        assert!(dirs.iter().all(|d| d.ends_with("Local Storage/leveldb")));
    }

    #[test]
    fn test_macos_candidates() {
        let scanner = LocalTokenScanner::new(
            Platform::MacOs,
            ScanEnv {
                home: Some(PathBuf::from("/Users/me")),
                ..ScanEnv::default()
            },
        );
        let dirs = scanner.candidate_dirs().unwrap();
        assert_eq!(
            dirs[0],
            PathBuf::from("/Users/me/Library/Application Support/slobs-client/Local Storage/leveldb")
        );
        assert_eq!(dirs.len(), 2);
    }

    /// Counts every call and can refuse reads of chosen files.
    #[derive(Default)]
    struct FakeFs {
        calls: AtomicUsize,
        files: HashMap<PathBuf, (SystemTime, Vec<u8>)>,
        locked: Vec<PathBuf>,
    }

    impl StorageFs for FakeFs {
        fn exists(&self, _dir: &Path) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn list_dir(&self, _dir: &Path) -> io::Result<Vec<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.files.keys().cloned().collect())
        }

        fn modified(&self, path: &Path) -> io::Result<SystemTime> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.files[path].0)
        }

        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.locked.iter().any(|p| p == path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            Ok(self.files[path].1.clone())
        }
    }

    #[test]
    fn test_unsupported_platform_touches_no_files() {
        let fake = Arc::new(FakeFs::default());
        let scanner = LocalTokenScanner::new(Platform::Unsupported("linux".into()), ScanEnv::default())
            .with_fs(fake.clone());

        let err = scanner.scan().unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_locked_file_is_skipped() {
        let now = SystemTime::now();
        let newest = PathBuf::from("/store/2.log");
        let older = PathBuf::from("/store/1.log");
        let mut fake = FakeFs::default();
        fake.files.insert(newest.clone(), (now, br#""apiToken":"feed""#.to_vec()));
        fake.files.insert(
            older.clone(),
            (now - Duration::from_secs(5), br#""apiToken":"beef""#.to_vec()),
        );
        fake.locked.push(newest);

        let scanner = LocalTokenScanner::new(Platform::Windows, ScanEnv::default())
            .with_candidate_dirs(vec![PathBuf::from("/store")])
            .with_fs(Arc::new(fake));
        assert_eq!(scanner.scan().unwrap().as_str(), "beef");
    }

    #[tokio::test]
    async fn test_off_thread_scan_matches_blocking_scan() {
        let tmp = TempDir::new().unwrap();
        let dir = slobs_dir(tmp.path());
        write_aged(&dir.join("9.log"), br#""apiToken":"c0ffee""#, Duration::from_secs(0));

        let token = windows_scanner(tmp.path()).scan_blocking_task().await.unwrap();
        assert_eq!(token.as_str(), "c0ffee");
    }
}
