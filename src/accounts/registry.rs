use super::{AccountError, SecretStore};
use crate::auth::BearerToken;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const METADATA_FILE: &str = "accounts.json";

/// How the account's token was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Local,
    Web,
}

/// Account metadata. The token itself lives in the [`SecretStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub kind: AccountKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_profile_path: Option<PathBuf>,
}

impl Account {
    /// New account with a random id
    pub fn new(name: impl Into<String>, kind: AccountKind) -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            id: hex::encode(bytes),
            name: name.into(),
            kind,
            username: None,
            last_used: None,
            browser_profile_path: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_account: Option<String>,
}

pub struct AccountRegistry {
    dir: PathBuf,
    metadata: Metadata,
    secrets: Arc<dyn SecretStore>,
}

impl AccountRegistry {
    /// Open the registry stored in `dir`; a missing file is an empty registry
    pub fn open(dir: impl Into<PathBuf>, secrets: Arc<dyn SecretStore>) -> Result<Self, AccountError> {
        let dir = dir.into();
        let path = dir.join(METADATA_FILE);
        let metadata = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Metadata::default()
        };
        debug!(path = %path.display(), accounts = metadata.accounts.len(), "account registry opened");

        Ok(Self {
            dir,
            metadata,
            secrets,
        })
    }

    /// `<data dir>/tiklive`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("tiklive"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accounts, most recently used first
    pub fn list(&self) -> Vec<Account> {
        let mut accounts = self.metadata.accounts.clone();
        accounts.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        accounts
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.metadata.accounts.iter().find(|a| a.id == id)
    }

    /// Insert or replace `account` and store its token
    pub fn upsert(&mut self, account: Account, token: &BearerToken) -> Result<(), AccountError> {
        self.secrets.set(&account.id, token.as_str())?;
        info!(id = %account.id, name = %account.name, "saving account");

        match self.metadata.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => self.metadata.accounts.push(account),
        }
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> Result<Account, AccountError> {
        let index = self
            .metadata
            .accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))?;

        self.secrets.delete(id)?;
        let removed = self.metadata.accounts.remove(index);
        if self.metadata.default_account.as_deref() == Some(id) {
            self.metadata.default_account = None;
        }
        self.save()?;
        Ok(removed)
    }

    pub fn token(&self, id: &str) -> Result<BearerToken, AccountError> {
        if self.get(id).is_none() {
            return Err(AccountError::NotFound(id.to_string()));
        }
        self.secrets
            .get(id)?
            .map(BearerToken::new)
            .ok_or_else(|| AccountError::MissingToken(id.to_string()))
    }

    /// Mark the account as used now
    pub fn touch(&mut self, id: &str) -> Result<(), AccountError> {
        let account = self
            .metadata
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))?;
        account.last_used = Some(Utc::now());
        self.save()
    }

    pub fn set_default(&mut self, id: &str) -> Result<(), AccountError> {
        if self.get(id).is_none() {
            return Err(AccountError::NotFound(id.to_string()));
        }
        self.metadata.default_account = Some(id.to_string());
        self.save()
    }

    /// The explicit default, else the most recently used account
    pub fn default_account(&self) -> Option<Account> {
        self.metadata
            .default_account
            .as_deref()
            .and_then(|id| self.get(id).cloned())
            .or_else(|| self.list().into_iter().next())
    }

    /// Dedicated browser profile directory for the account, created on demand
    pub fn profile_dir_for(&self, id: &str) -> Result<PathBuf, AccountError> {
        let dir = self.dir.join("profiles").join(id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn save(&self) -> Result<(), AccountError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(METADATA_FILE);
        let data = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(&path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }
}
