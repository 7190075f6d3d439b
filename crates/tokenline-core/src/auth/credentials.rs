//! Durable storage for the access/refresh token pair.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Token file name in the data directory
const TOKEN_FILE: &str = "tokens.json";

/// Keychain service name
const SERVICE_NAME: &str = "tokenline";

const ACCESS_ACCOUNT: &str = "access_token";
const REFRESH_ACCOUNT: &str = "refresh_token";

/// Key-value persistence of one access/refresh token pair.
///
/// Tokens are opaque: nothing here validates their shape. `put` overwrites
/// only the values supplied, `clear` removes both and may be called repeatedly.
pub trait CredentialStore: Send + Sync {
    fn put(&self, access: Option<&str>, refresh: Option<&str>) -> Result<()>;
    fn get_access(&self) -> Result<Option<String>>;
    fn get_refresh(&self) -> Result<Option<String>>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl StoredTokens {
    fn apply(&mut self, access: Option<&str>, refresh: Option<&str>) {
        if let Some(access) = access {
            self.access_token = Some(access.to_string());
        }
        if let Some(refresh) = refresh {
            self.refresh_token = Some(refresh.to_string());
        }
        self.updated_at = Some(Utc::now());
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// Stores tokens as JSON in `<dir>/tokens.json`.
pub struct FileCredentialStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn load(path: &Path) -> Result<StoredTokens> {
        if !path.exists() {
            return Ok(StoredTokens::default());
        }
        let contents = std::fs::read_to_string(path).context("Failed to read token file")?;
        serde_json::from_str(&contents).context("Failed to parse token file")
    }

    fn save(path: &Path, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create token directory")?;
        }
        let contents = serde_json::to_string_pretty(tokens)?;
        std::fs::write(path, contents).context("Failed to write token file")?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for FileCredentialStore {
    fn put(&self, access: Option<&str>, refresh: Option<&str>) -> Result<()> {
        let _guard = self.guard();
        let path = self.path();
        let mut tokens = Self::load(&path)?;
        tokens.apply(access, refresh);
        Self::save(&path, &tokens)?;
        debug!(path = ?path, access = access.is_some(), refresh = refresh.is_some(), "Tokens written");
        Ok(())
    }

    fn get_access(&self) -> Result<Option<String>> {
        let _guard = self.guard();
        Ok(Self::load(&self.path())?.access_token)
    }

    fn get_refresh(&self) -> Result<Option<String>> {
        let _guard = self.guard();
        Ok(Self::load(&self.path())?.refresh_token)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.guard();
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Stores each token as its own entry in the OS keychain.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry> {
        Entry::new(&self.service, account).context("Failed to create keyring entry")
    }

    fn read(&self, account: &str) -> Result<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn write(&self, account: &str, value: &str) -> Result<()> {
        self.entry(account)?
            .set_password(value)
            .context("Failed to store token in keychain")
    }

    fn delete(&self, account: &str) -> Result<()> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn put(&self, access: Option<&str>, refresh: Option<&str>) -> Result<()> {
        if let Some(access) = access {
            self.write(ACCESS_ACCOUNT, access)?;
        }
        if let Some(refresh) = refresh {
            self.write(REFRESH_ACCOUNT, refresh)?;
        }
        Ok(())
    }

    fn get_access(&self) -> Result<Option<String>> {
        self.read(ACCESS_ACCOUNT)
    }

    fn get_refresh(&self) -> Result<Option<String>> {
        self.read(REFRESH_ACCOUNT)
    }

    fn clear(&self) -> Result<()> {
        self.delete(ACCESS_ACCOUNT)?;
        self.delete(REFRESH_ACCOUNT)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store with no persistence.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a token pair already present
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let store = Self::new();
        store.lock().apply(access, refresh);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredTokens> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn put(&self, access: Option<&str>, refresh: Option<&str>) -> Result<()> {
        self.lock().apply(access, refresh);
        Ok(())
    }

    fn get_access(&self) -> Result<Option<String>> {
        Ok(self.lock().access_token.clone())
    }

    fn get_refresh(&self) -> Result<Option<String>> {
        Ok(self.lock().refresh_token.clone())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = StoredTokens::default();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_overwrites_only_supplied_values() {
        let store = MemoryCredentialStore::with_tokens(Some("a1"), Some("r1"));
        store.put(Some("a2"), None).unwrap();
        assert_eq!(store.get_access().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.get_refresh().unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_memory_clear_is_idempotent() {
        let store = MemoryCredentialStore::with_tokens(Some("a1"), Some("r1"));
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.get_access().unwrap().is_none());
        assert!(store.get_refresh().unwrap().is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));
        assert!(store.get_access().unwrap().is_none());

        store.put(Some("a1"), Some("r1")).unwrap();
        store.put(Some("a2"), None).unwrap();

        let reopened = FileCredentialStore::new(dir.path().join("nested"));
        assert_eq!(reopened.get_access().unwrap().as_deref(), Some("a2"));
        assert_eq!(reopened.get_refresh().unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        store.put(Some("a1"), Some("r1")).unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
        assert!(store.get_refresh().unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.get_access().is_err());
    }
}
