//! Saved accounts: metadata on disk, tokens in the OS keyring.

mod lock;
mod registry;
mod secrets;

pub use lock::CaptureLock;
pub use registry::{Account, AccountKind, AccountRegistry};
pub use secrets::{KeyringStore, MemoryStore, SecretStore};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("No token stored for account {0}")]
    MissingToken(String),

    #[error("A login is already running with profile {}", .profile.display())]
    CaptureInProgress { profile: PathBuf },

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Account metadata is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
