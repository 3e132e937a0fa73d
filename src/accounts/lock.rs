use super::AccountError;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = ".tiklive.lock";

/// Exclusive claim on a browser profile directory for one login.
/// Released on drop.
#[derive(Debug)]
pub struct CaptureLock {
    file: File,
    path: PathBuf,
}

impl CaptureLock {
    pub fn acquire(profile_dir: &Path) -> Result<Self, AccountError> {
        fs::create_dir_all(profile_dir)?;
        let path = profile_dir.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(AccountError::CaptureInProgress {
                profile: profile_dir.to_path_buf(),
            });
        }

        debug!(lock = %path.display(), "capture lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CaptureLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
