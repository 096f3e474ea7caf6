//! Persistent store for registration API keys.
//!
//! Keys live in a single JSON document (`keys.json`) in the data directory.
//! Ids increase monotonically and are never reused, even after deletion.

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::clock::now_timestamp;

/// File name of the key store inside the data directory.
pub const KEYS_FILE: &str = "keys.json";

/// One stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique, increasing id.
    pub id: u64,
    /// Human-readable label.
    pub name: String,
    /// Bearer token sent with registration requests.
    pub value: String,
    /// Creation time, `YYYY-MM-DD HH:MM:SS` UTC.
    pub created_at: String,
}

impl ApiKey {
    /// The value with all but the last four characters hidden.
    pub fn masked_value(&self) -> String {
        let chars: Vec<char> = self.value.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{visible}", "*".repeat(chars.len() - 4))
    }
}

/// Errors from the key store.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Reading or writing the store failed.
    #[error("Cannot access key store {}: {source}", .path.display())]
    Io {
        /// Store file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The store file is not valid JSON.
    #[error("Key store {} is corrupt: {source}", .path.display())]
    Corrupt {
        /// Store file.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// A key needs a non-empty name and value.
    #[error("Key {0} must not be empty")]
    Empty(&'static str),

    /// No data directory could be determined.
    #[error("Cannot determine a data directory; pass --data-dir")]
    NoDataDir,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    keys: Vec<ApiKey>,
}

/// File-backed credential store.
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    data: KeyFile,
}

impl KeyStore {
    /// Default data directory for the store.
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scanlink").map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Open the store in `dir`, or the default directory if `None`.
    pub fn open_in(dir: Option<&Path>) -> Result<Self, KeyStoreError> {
        match dir {
            Some(dir) => Self::open(dir),
            None => Self::open(&Self::default_dir().ok_or(KeyStoreError::NoDataDir)?),
        }
    }

    /// Open the store in `dir`. A missing file is an empty store.
    pub fn open(dir: &Path) -> Result<Self, KeyStoreError> {
        let path = dir.join(KEYS_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                KeyStoreError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => KeyFile::default(),
            Err(source) => return Err(KeyStoreError::Io { path, source }),
        };
        debug!("Opened key store {}", path.display());
        Ok(Self { path, data })
    }

    /// Store file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All keys, newest first.
    pub fn list(&self) -> Vec<&ApiKey> {
        let mut keys: Vec<&ApiKey> = self.data.keys.iter().collect();
        keys.sort_by(|a, b| b.id.cmp(&a.id));
        keys
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.keys.is_empty()
    }

    /// Key by id.
    pub fn get(&self, id: u64) -> Option<&ApiKey> {
        self.data.keys.iter().find(|k| k.id == id)
    }

    /// Key by id, or by name (newest match wins).
    pub fn find(&self, selector: &str) -> Option<&ApiKey> {
        let selector = selector.trim();
        if let Some(key) = selector.parse().ok().and_then(|id| self.get(id)) {
            return Some(key);
        }
        self.list().into_iter().find(|k| k.name == selector)
    }

    /// Add a key and persist the store.
    pub fn create(&mut self, name: &str, value: &str) -> Result<ApiKey, KeyStoreError> {
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(KeyStoreError::Empty("name"));
        }
        if value.is_empty() {
            return Err(KeyStoreError::Empty("value"));
        }

        let highest = self.data.keys.iter().map(|k| k.id).max().unwrap_or(0);
        let id = self.data.next_id.max(highest) + 1;
        let key = ApiKey {
            id,
            name: name.to_string(),
            value: value.to_string(),
            created_at: now_timestamp(),
        };

        let mut data = self.data.clone();
        data.next_id = id;
        data.keys.push(key.clone());
        self.commit(data)?;
        info!("Created API key #{id} ({name})");
        Ok(key)
    }

    /// Remove a key. Returns `false` if no key has that id.
    pub fn delete(&mut self, id: u64) -> Result<bool, KeyStoreError> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        let mut data = self.data.clone();
        data.keys.retain(|k| k.id != id);
        self.commit(data)?;
        info!("Deleted API key #{id}");
        Ok(true)
    }

    // The in-memory store only changes once `data` is on disk.
    fn commit(&mut self, data: KeyFile) -> Result<(), KeyStoreError> {
        self.save(&data)?;
        self.data = data;
        Ok(())
    }

    fn save(&self, data: &KeyFile) -> Result<(), KeyStoreError> {
        let io_err = |source| KeyStoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| io_err(io::Error::other(e)))?;

        // Write then rename so a crash never leaves a truncated store
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!("Saved key store {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_create_list_newest_first() {
        let dir = tempdir().unwrap();
        let mut store = KeyStore::open(dir.path()).unwrap();

        let first = store.create("front-desk", "tok-1111").unwrap();
        let second = store.create("side-door", "tok-2222").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.created_at.len(), 19);

        let names: Vec<&str> = store.list().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["side-door", "front-desk"]);
    }

    #[test]
    fn test_persists_across_open() {
        let dir = tempdir().unwrap();
        {
            let mut store = KeyStore::open(dir.path()).unwrap();
            store.create("front-desk", "secret-value").unwrap();
        }
        let store = KeyStore::open(dir.path()).unwrap();
        let key = store.get(1).unwrap();
        assert_eq!(key.name, "front-desk");
        assert_eq!(key.value, "secret-value");
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let dir = tempdir().unwrap();
        let mut store = KeyStore::open(dir.path()).unwrap();
        store.create("a", "1").unwrap();
        let b = store.create("b", "2").unwrap();

        assert!(store.delete(b.id).unwrap());
        assert!(!store.delete(b.id).unwrap());

        let c = store.create("c", "3").unwrap();
        assert_eq!(c.id, 3);

        let reopened = KeyStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list().len(), 2);
        assert!(reopened.get(2).is_none());
    }

    #[test]
    fn test_failed_save_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let mut store = KeyStore::open(dir.path()).unwrap();
        store.create("a", "1").unwrap();

        // A directory in the way of the temp file makes every save fail
        let blocker = dir.path().join("keys.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(matches!(store.create("b", "2"), Err(KeyStoreError::Io { .. })));
        assert!(matches!(store.delete(1), Err(KeyStoreError::Io { .. })));
        assert_eq!(store.list().len(), 1);
        assert!(store.get(1).is_some());

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(store.create("b", "2").unwrap().id, 2);
        assert_eq!(KeyStore::open(dir.path()).unwrap().list().len(), 2);
    }

    #[test]
    fn test_find_by_id_or_name() {
        let dir = tempdir().unwrap();
        let mut store = KeyStore::open(dir.path()).unwrap();
        store.create("front-desk", "old").unwrap();
        store.create("front-desk", "new").unwrap();
        store.create("side-door", "x").unwrap();

        assert_eq!(store.find("3").unwrap().name, "side-door");
        assert_eq!(store.find("front-desk").unwrap().value, "new");
        assert!(store.find("back-door").is_none());
        assert!(store.find("42").is_none());
    }

    #[test]
    fn test_empty_name_or_value_rejected() {
        let dir = tempdir().unwrap();
        let mut store = KeyStore::open(dir.path()).unwrap();
        assert!(matches!(store.create("  ", "v"), Err(KeyStoreError::Empty("name"))));
        assert!(matches!(store.create("n", ""), Err(KeyStoreError::Empty("value"))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(KEYS_FILE), "not json").unwrap();
        assert!(matches!(
            KeyStore::open(dir.path()),
            Err(KeyStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_masked_value() {
        let key = ApiKey {
            id: 1,
            name: "k".to_string(),
            value: "abcdef123456".to_string(),
            created_at: String::new(),
        };
        assert_eq!(key.masked_value(), "********3456");

        let short = ApiKey {
            value: "abc".to_string(),
            ..key
        };
        assert_eq!(short.masked_value(), "***");
    }
}
