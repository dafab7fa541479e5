//! Durable key-value preference storage.
//!
//! The engine persists two things across restarts: the per-source version
//! records of the [`VersionStore`](crate::store::VersionStore) and the
//! new-user cutoff sentinel. Both go through the [`PreferenceStore`] trait
//! so embedders can back them with whatever storage the surrounding app
//! already has. [`FilePreferenceStore`] is the default: a single JSON file
//! under the platform config directory.

use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable key→value storage. Values are JSON strings.
///
/// Implementations must be safe to call from any thread; `put` must be
/// durable before it returns.
pub trait PreferenceStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Durably store `value` under `key`.
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// JSON-file-backed preference store.
///
/// The whole map is rewritten on every `put`. Writes here are rare (one per
/// successful reconcile cycle) so the simplicity wins over incrementality.
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FilePreferenceStore {
    /// Open (or create) the store at `path`.
    ///
    /// A missing file starts empty. A corrupt file is treated as empty
    /// rather than fatal; the next `put` rewrites it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("preference file {} corrupt, starting fresh: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the store at the default location,
    /// `<config dir>/inapp-sync/state.json`.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| SyncError::Persistence("cannot determine config directory".to_owned()))?;
        Self::open(dir.join("inapp-sync").join("state.json"))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_owned(), value.to_owned());

        let json = serde_json::to_string_pretty(&*entries)?;
        std::fs::write(&self.path, json).map_err(|e| {
            SyncError::Persistence(format!("cannot write {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

/// In-memory preference store for tests and embedders without a disk.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
