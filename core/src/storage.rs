/*
    jam-recorder-rs | Rust CLI tool to record a Spotify jam into a playlist.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use log::warn;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage keys shared by the token store, the PKCE generator and the profile cache.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "spotify_access_token";
    pub const TOKEN_EXPIRY: &str = "spotify_token_expiry";
    pub const REFRESH_TOKEN: &str = "spotify_refresh_token";
    pub const USER_PROFILE: &str = "spotify_user_profile";
    pub const CODE_VERIFIER: &str = "spotify_code_verifier";
}

pub const STORAGE_PATH_VAR: &str = "JAM_STORAGE_PATH";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read storage file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Storage file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Durable string-to-string storage that survives restarts.
///
/// Writes never fail from the caller's perspective; implementations log
/// persistence problems instead.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// JSON-file backed store. The whole map is rewritten on each mutation,
/// which is fine for the handful of keys this application keeps.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Read { path, source }),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `$JAM_STORAGE_PATH`, or `storage.json` in the platform data directory.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(STORAGE_PATH_VAR) {
            return PathBuf::from(path);
        }
        directories::ProjectDirs::from("", "", "jam-recorder")
            .map(|dirs| dirs.data_dir().join("storage.json"))
            .unwrap_or_else(|| PathBuf::from(".jam_recorder_storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Could not create storage directory {}: {}", parent.display(), e);
                return;
            }
        }
        let serialized = match serde_json::to_string_pretty(entries) {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not serialize storage: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, serialized) {
            warn!("Could not write storage file {}: {}", self.path.display(), e);
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)) {
                warn!("Could not restrict storage file permissions: {}", e);
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get(keys::ACCESS_TOKEN).is_none());

        store.set(keys::ACCESS_TOKEN, "tok");
        assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("tok"));

        store.remove(keys::ACCESS_TOKEN);
        assert!(store.get(keys::ACCESS_TOKEN).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = FileStore::open(&path).unwrap();
        store.set(keys::REFRESH_TOKEN, "refresh");
        store.set(keys::TOKEN_EXPIRY, "1700000000000");
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(keys::REFRESH_TOKEN).as_deref(), Some("refresh"));
        assert_eq!(reopened.get(keys::TOKEN_EXPIRY).as_deref(), Some("1700000000000"));
    }

    #[test]
    fn test_file_store_remove_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileStore::open(&path).unwrap();
        store.set(keys::CODE_VERIFIER, "v1");
        store.remove(keys::CODE_VERIFIER);

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.get(keys::CODE_VERIFIER).is_none());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }
}
