use super::AccountError;
use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

const SERVICE_NAME: &str = "tiklive";

/// Encrypted-at-rest storage for account tokens, keyed by account id
pub trait SecretStore: Send + Sync {
    fn set(&self, account_id: &str, token: &str) -> Result<(), AccountError>;
    fn get(&self, account_id: &str) -> Result<Option<String>, AccountError>;
    fn delete(&self, account_id: &str) -> Result<(), AccountError>;
}

/// OS keyring backend; encryption is left to the platform store
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, account_id: &str) -> Result<Entry, AccountError> {
        Entry::new(&self.service_name, &format!("token/{}", account_id))
            .map_err(|e| AccountError::Keyring(e.to_string()))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn set(&self, account_id: &str, token: &str) -> Result<(), AccountError> {
        self.entry(account_id)?
            .set_password(token)
            .map_err(|e| AccountError::Keyring(e.to_string()))
    }

    fn get(&self, account_id: &str) -> Result<Option<String>, AccountError> {
        match self.entry(account_id)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AccountError::Keyring(e.to_string())),
        }
    }

    fn delete(&self, account_id: &str) -> Result<(), AccountError> {
        match self.entry(account_id)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AccountError::Keyring(e.to_string())),
        }
    }
}

/// In-process store for tests and keyring-less environments
#[derive(Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // a poisoned map is still a valid map
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecretStore for MemoryStore {
    fn set(&self, account_id: &str, token: &str) -> Result<(), AccountError> {
        self.tokens().insert(account_id.to_string(), token.to_string());
        Ok(())
    }

    fn get(&self, account_id: &str) -> Result<Option<String>, AccountError> {
        Ok(self.tokens().get(account_id).cloned())
    }

    fn delete(&self, account_id: &str) -> Result<(), AccountError> {
        self.tokens().remove(account_id);
        Ok(())
    }
}
