//! Key-value persistence for preferences.
//!
//! The utility persists exactly two string entries: the settings JSON
//! ([`SETTINGS_KEY`]) and the theme name ([`THEME_KEY`]). Anything that can
//! store short strings by name can back them, so the seam is the small
//! [`KeyValueStore`] trait.
//!
//! [`FileStore`] keeps one file per key in a directory and writes through a
//! temp file + rename, so a crash mid-write never leaves a truncated entry.
//! [`MemoryStore`] is used for `--no-persist` runs and in tests.

use crate::config::StorageLocation;
use crate::error::Docx2MdError;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Entry holding the serialised [`crate::ConversionSettings`].
pub const SETTINGS_KEY: &str = "conversionSettings";

/// Entry holding `"light"` or `"dark"`.
pub const THEME_KEY: &str = "theme";

/// Directory name under the user config dir.
pub const APP_DIR_NAME: &str = "edgequake-docx2md";

/// A named-string store.
///
/// All methods report failures as [`Docx2MdError::StorageRead`] or
/// [`Docx2MdError::StorageWrite`]; callers degrade instead of aborting.
pub trait KeyValueStore: Send + Sync {
    /// Read an entry. `Ok(None)` when it was never written.
    fn get(&self, key: &str) -> Result<Option<String>, Docx2MdError>;

    /// Create or overwrite an entry.
    fn set(&self, key: &str, value: &str) -> Result<(), Docx2MdError>;

    /// Delete an entry. Removing a missing entry is not an error.
    fn remove(&self, key: &str) -> Result<(), Docx2MdError>;
}

/// Open the store described by a [`StorageLocation`].
///
/// Falls back to an in-memory store when the platform has no config
/// directory (the failure is logged, preferences simply do not persist).
pub fn open_store(location: &StorageLocation) -> Arc<dyn KeyValueStore> {
    match location {
        StorageLocation::Directory(dir) => Arc::new(FileStore::new(dir.clone())),
        StorageLocation::Ephemeral => Arc::new(MemoryStore::default()),
        StorageLocation::UserConfigDir => match FileStore::user_default() {
            Some(store) => Arc::new(store),
            None => {
                tracing::warn!("No user config directory; preferences will not persist");
                Arc::new(MemoryStore::default())
            }
        },
    }
}

// ── File-backed store ────────────────────────────────────────────────────

/// One file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config dir>/edgequake-docx2md`, if the platform has one.
    pub fn user_default() -> Option<Self> {
        dirs::config_dir().map(|d| Self::new(d.join(APP_DIR_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed identifiers; anything else is flattened so it can
        // never escape the store directory.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, Docx2MdError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Docx2MdError::StorageRead {
                key: key.to_string(),
                detail: format!("{}: {e}", path.display()),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Docx2MdError> {
        let write_err = |detail: String| Docx2MdError::StorageWrite {
            key: key.to_string(),
            detail,
        };
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| write_err(format!("{}: {e}", self.dir.display())))?;

        let path = self.path_for(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(value.as_bytes())
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| write_err(format!("{}: {}", path.display(), e.error)))?;
        debug!("Stored '{}' ({} bytes) at {}", key, value.len(), path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Docx2MdError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Docx2MdError::StorageWrite {
                key: key.to_string(),
                detail: format!("{}: {e}", path.display()),
            }),
        }
    }
}

// ── In-memory store ──────────────────────────────────────────────────────

/// A process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// A store pre-populated with the given entries.
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, Docx2MdError> {
        self.entries
            .lock()
            .map_err(|_| Docx2MdError::Internal("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Docx2MdError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Docx2MdError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Docx2MdError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
