//! Token persistence.
//!
//! Tokens live in two scopes: a durable one that survives restarts (a JSON
//! file) and a transient one that dies with the process. Reads prefer the
//! durable scope; clearing always wipes both.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::expiry::{self, ExpiryOracle};

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Default token file name within the data directory.
pub const TOKEN_FILE: &str = "tokens.json";

const KEYS: [&str; 2] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY];

type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Token types
// ============================================================================

/// An access/refresh token pair as issued at login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}

/// Whatever is currently stored; either token may be missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Which storage scope a token pair is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Survives process restarts.
    Durable,
    /// Lives only as long as the process.
    Transient,
}

impl Scope {
    fn other(self) -> Self {
        match self {
            Scope::Durable => Scope::Transient,
            Scope::Transient => Scope::Durable,
        }
    }
}

// ============================================================================
// TokenStorage Trait
// ============================================================================

/// A single key/value storage scope.
pub trait TokenStorage: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-process storage, used for the transient scope and in tests.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// JSON-file storage, used for the durable scope.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl FileStorage {
    /// Store tokens in [`TOKEN_FILE`] under `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_path(data_dir.join(TOKEN_FILE))
    }

    /// Create with a custom file path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn loaded<'a>(
        &self,
        cache: &'a mut Option<HashMap<String, String>>,
    ) -> StorageResult<&'a mut HashMap<String, String>> {
        if cache.is_none() {
            *cache = Some(read_entries(&self.path)?);
        }
        Ok(cache.get_or_insert_with(HashMap::new))
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut cache = self.cache.lock();
        Ok(self.loaded(&mut cache)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        let entries = self.loaded(&mut cache)?;

        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());
        write_entries(&self.path, &updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        let entries = self.loaded(&mut cache)?;
        if !entries.contains_key(key) {
            return Ok(());
        }

        let mut updated = entries.clone();
        updated.remove(key);
        if updated.is_empty() {
            remove_file(&self.path)?;
        } else {
            write_entries(&self.path, &updated)?;
        }
        *entries = updated;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_entries(path: &Path) -> StorageResult<HashMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(io_error(path, e)),
    }
}

fn write_entries(path: &Path, entries: &HashMap<String, String>) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json).map_err(|e| io_error(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error(path, e))?;
    }

    Ok(())
}

fn remove_file(path: &Path) -> StorageResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

// ============================================================================
// TokenStore
// ============================================================================

/// The access/refresh token pair, mirrored across a durable and a transient
/// scope.
///
/// Every operation holds the store lock for its whole duration, so callers
/// never observe a half-written or half-cleared pair.
#[derive(Debug)]
pub struct TokenStore {
    durable: Box<dyn TokenStorage>,
    transient: Box<dyn TokenStorage>,
    lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(durable: impl TokenStorage + 'static, transient: impl TokenStorage + 'static) -> Self {
        Self {
            durable: Box::new(durable),
            transient: Box::new(transient),
            lock: Mutex::new(()),
        }
    }

    /// File-backed durable scope under `data_dir`, in-memory transient scope.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self::new(FileStorage::new(data_dir), MemoryStorage::new())
    }

    /// Both scopes in memory (for testing).
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new(), MemoryStorage::new())
    }

    fn scope(&self, scope: Scope) -> &dyn TokenStorage {
        match scope {
            Scope::Durable => self.durable.as_ref(),
            Scope::Transient => self.transient.as_ref(),
        }
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match self.durable.get(key)? {
            Some(value) => Ok(Some(value)),
            None => self.transient.get(key),
        }
    }

    /// Read both tokens, durable scope first.
    pub fn get(&self) -> StorageResult<StoredTokens> {
        let _guard = self.lock.lock();
        Ok(StoredTokens {
            access_token: self.read(ACCESS_TOKEN_KEY)?,
            refresh_token: self.read(REFRESH_TOKEN_KEY)?,
        })
    }

    /// Store a freshly issued pair in `scope`.
    ///
    /// Anything left in the other scope is dropped, otherwise a stale durable
    /// pair would shadow a new transient one.
    pub fn set(&self, pair: &TokenPair, scope: Scope) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let target = self.scope(scope);
        target.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
        target.set(REFRESH_TOKEN_KEY, &pair.refresh_token)?;

        let other = self.scope(scope.other());
        for key in KEYS {
            other.remove(key)?;
        }

        tracing::debug!(?scope, "tokens stored");
        Ok(())
    }

    /// Write refreshed tokens into the scope that currently holds the session.
    ///
    /// `refresh_token` is `None` when the server did not rotate it; only the
    /// access token is written then.
    pub fn update(&self, access_token: &str, refresh_token: Option<&str>) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let scope = self.active_scope()?;
        let target = self.scope(scope);

        target.set(ACCESS_TOKEN_KEY, access_token)?;
        if let Some(refresh_token) = refresh_token {
            target.set(REFRESH_TOKEN_KEY, refresh_token)?;
        }

        tracing::debug!(?scope, rotated = refresh_token.is_some(), "tokens updated");
        Ok(())
    }

    fn active_scope(&self) -> StorageResult<Scope> {
        for key in [REFRESH_TOKEN_KEY, ACCESS_TOKEN_KEY] {
            if self.durable.get(key)?.is_some() {
                return Ok(Scope::Durable);
            }
        }
        Ok(Scope::Transient)
    }

    /// Remove both tokens from both scopes.
    ///
    /// Every removal is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let mut first_error = None;

        for storage in [self.durable.as_ref(), self.transient.as_ref()] {
            for key in KEYS {
                if let Err(e) = storage.remove(key) {
                    tracing::warn!(key, error = %e, "failed to remove token");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Expiry summary of the stored tokens, for display.
    pub fn info(&self, oracle: &ExpiryOracle) -> StorageResult<Option<TokenInfo>> {
        let tokens = self.get()?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let access_expires_at = tokens.access_token.as_deref().and_then(expiry::expires_at);
        let refresh_expires_at = tokens.refresh_token.as_deref().and_then(expiry::expires_at);

        let now = Utc::now();
        let expires_in_secs = access_expires_at
            .map(|at| (at - now).num_seconds().max(0) as u64)
            .unwrap_or(0);

        Ok(Some(TokenInfo {
            access_expires_at,
            refresh_expires_at,
            expires_in_secs,
            is_expired: oracle.is_expired(tokens.access_token.as_deref()),
            refresh_expired: oracle.is_expired(tokens.refresh_token.as_deref()),
        }))
    }
}

// ============================================================================
// TokenInfo
// ============================================================================

/// Information about stored tokens for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub access_expires_at: Option<DateTime<Utc>>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub expires_in_secs: u64,
    pub is_expired: bool,
    pub refresh_expired: bool,
}

impl TokenInfo {
    pub fn expires_in_display(&self) -> String {
        if self.is_expired && self.refresh_expired {
            "Expired (login required)".to_string()
        } else if self.is_expired {
            "Expired (will refresh on next use)".to_string()
        } else {
            let hours = self.expires_in_secs / 3600;
            let minutes = (self.expires_in_secs % 3600) / 60;
            format!("{}h {}m", hours, minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair() -> TokenPair {
        TokenPair::new("access-1", "refresh-1")
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let temp = tempdir().unwrap();
        FileStorage::new(temp.path()).set(ACCESS_TOKEN_KEY, "a").unwrap();

        let reopened = FileStorage::new(temp.path());
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_file_storage_removes_file_when_empty() {
        let temp = tempdir().unwrap();
        let storage = FileStorage::new(temp.path());
        storage.set(ACCESS_TOKEN_KEY, "a").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        assert!(storage.path().exists());

        storage.remove(ACCESS_TOKEN_KEY).unwrap();
        assert!(storage.path().exists());
        storage.remove(REFRESH_TOKEN_KEY).unwrap();
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(TOKEN_FILE), "{not json").unwrap();

        let storage = FileStorage::new(temp.path());
        assert!(matches!(
            storage.get(ACCESS_TOKEN_KEY),
            Err(StorageError::Serialization(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let storage = FileStorage::new(temp.path());
        storage.set(ACCESS_TOKEN_KEY, "a").unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_get_prefers_durable_scope() {
        let durable = MemoryStorage::new();
        durable.set(ACCESS_TOKEN_KEY, "durable-access").unwrap();
        let transient = MemoryStorage::new();
        transient.set(ACCESS_TOKEN_KEY, "transient-access").unwrap();
        transient.set(REFRESH_TOKEN_KEY, "transient-refresh").unwrap();

        let store = TokenStore::new(durable, transient);
        let tokens = store.get().unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("durable-access"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("transient-refresh"));
    }

    #[test]
    fn test_set_replaces_other_scope() {
        let store = TokenStore::in_memory();
        store.set(&TokenPair::new("old-a", "old-r"), Scope::Durable).unwrap();
        store.set(&pair(), Scope::Transient).unwrap();

        let tokens = store.get().unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("access-1"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_update_writes_to_active_scope() {
        let temp = tempdir().unwrap();
        let store = TokenStore::with_data_dir(temp.path());
        store.set(&pair(), Scope::Durable).unwrap();

        store.update("access-2", Some("refresh-2")).unwrap();

        let on_disk = FileStorage::new(temp.path());
        assert_eq!(on_disk.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access-2"));
        assert_eq!(on_disk.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("refresh-2"));
    }

    #[test]
    fn test_update_without_rotation_keeps_refresh_token() {
        let store = TokenStore::in_memory();
        store.set(&pair(), Scope::Transient).unwrap();

        store.update("access-2", None).unwrap();

        let tokens = store.get().unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("access-2"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_clear_wipes_both_scopes() {
        let durable = MemoryStorage::new();
        durable.set(ACCESS_TOKEN_KEY, "a").unwrap();
        durable.set(REFRESH_TOKEN_KEY, "r").unwrap();
        let transient = MemoryStorage::new();
        transient.set(ACCESS_TOKEN_KEY, "a2").unwrap();
        transient.set(REFRESH_TOKEN_KEY, "r2").unwrap();

        let store = TokenStore::new(durable, transient);
        store.clear().unwrap();

        assert!(store.get().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct BrokenStorage;

    impl TokenStorage for BrokenStorage {
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Ok(())
        }

        fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(io_error(
                Path::new("broken"),
                std::io::Error::other("read-only"),
            ))
        }
    }

    #[test]
    fn test_clear_continues_past_failing_scope() {
        let transient = MemoryStorage::new();
        transient.set(ACCESS_TOKEN_KEY, "a").unwrap();
        transient.set(REFRESH_TOKEN_KEY, "r").unwrap();

        let store = TokenStore::new(BrokenStorage, transient);
        assert!(store.clear().is_err());
        // the healthy scope was still wiped
        assert!(store.get().unwrap().is_empty());
    }

    #[test]
    fn test_info_empty_store() {
        let store = TokenStore::in_memory();
        assert!(store.info(&ExpiryOracle::default()).unwrap().is_none());
    }

    #[test]
    fn test_info_with_opaque_tokens() {
        let store = TokenStore::in_memory();
        store.set(&pair(), Scope::Transient).unwrap();

        let info = store.info(&ExpiryOracle::default()).unwrap().unwrap();
        assert!(info.is_expired);
        assert!(info.refresh_expired);
        assert!(info.access_expires_at.is_none());
        assert_eq!(info.expires_in_display(), "Expired (login required)");
    }

    #[test]
    fn test_token_info_display() {
        let refreshable = TokenInfo {
            access_expires_at: None,
            refresh_expires_at: None,
            expires_in_secs: 0,
            is_expired: true,
            refresh_expired: false,
        };
        assert!(refreshable.expires_in_display().contains("will refresh"));

        let valid = TokenInfo {
            expires_in_secs: 7200,
            is_expired: false,
            ..refreshable
        };
        assert_eq!(valid.expires_in_display(), "2h 0m");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let rendered = format!("{:?}", pair());
        assert!(!rendered.contains("access-1"));
        assert!(rendered.contains("[redacted]"));
    }
}
