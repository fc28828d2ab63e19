//! Auth token storage.
//!
//! # Design
//! The store is injected into `EndpointFactory` rather than reached globally,
//! so tests use `MemoryTokenStore` and applications that need persistence
//! across runs use `FileTokenStore`. Reads are synchronous; writes usually come
//! from a login flow outside the endpoint lifecycle.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::config::{EndpointConfig, UseToken};

/// Key used when `use_token` is the boolean `true`.
pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Key/value storage for auth tokens.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Storage key the token of `config` is read from; empty when auth is off.
pub fn token_name(config: &EndpointConfig) -> String {
    match &config.use_token {
        UseToken::Flag(true) => DEFAULT_TOKEN_KEY.to_string(),
        UseToken::Flag(false) => String::new(),
        UseToken::Key(key) => key.clone(),
    }
}

/// Remove a stored token, `"token"` unless another key is given.
pub fn clear_token(store: &dyn TokenStore, key: Option<&str>) {
    store.remove(key.unwrap_or(DEFAULT_TOKEN_KEY));
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Token store persisted as a JSON object in a single file.
///
/// The file is read on every access so tokens written by another process are
/// picked up. I/O failures are logged and treated as an empty store.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> io::Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut entries = self.load()?;
        apply(&mut entries);
        let raw = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, raw)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read token file"
                );
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        }) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to store token");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.update(|entries| {
            entries.remove(key);
        }) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove token");
        }
    }
}
