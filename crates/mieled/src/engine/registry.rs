//! Persisted record of which entities each integration has registered.
//!
//! Integrations use it on startup to find entities that belonged to devices
//! which have since disappeared from their account. Changes are kept in
//! memory until [`EntityRegistry::flush`] writes them out.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::entity::Platform;

/// Stable IDs registered by one integration, grouped by platform.
pub type RegisteredIds = BTreeMap<Platform, BTreeSet<String>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to access entity registry at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse entity registry at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize entity registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    integrations: BTreeMap<String, RegisteredIds>,
}

#[derive(Debug)]
pub struct EntityRegistry {
    /// Backing file; `None` keeps the registry in memory only
    path: Option<PathBuf>,
    data: Mutex<RegistryData>,
    /// Changed since the last successful flush
    dirty: AtomicBool,
}

impl EntityRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(RegistryData::default()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the registry from `path`. A missing file yields an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| RegistryError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No entity registry at {}, starting empty", path.display());
                RegistryData::default()
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    /// Snapshot of the IDs registered by `integration`.
    pub fn registered(&self, integration: &str) -> RegisteredIds {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.integrations
            .get(integration)
            .cloned()
            .unwrap_or_default()
    }

    /// Record an entity. Returns whether it was newly added.
    pub fn insert(&self, integration: &str, platform: Platform, unique_id: &str) -> bool {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let added = data
            .integrations
            .entry(integration.to_string())
            .or_default()
            .entry(platform)
            .or_default()
            .insert(unique_id.to_string());
        if added {
            self.dirty.store(true, Ordering::Release);
        }
        added
    }

    /// Forget an entity. Returns whether it was present.
    pub fn remove(&self, integration: &str, platform: Platform, unique_id: &str) -> bool {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(ids) = data.integrations.get_mut(integration) else {
            return false;
        };
        let removed = ids
            .get_mut(&platform)
            .is_some_and(|set| set.remove(unique_id));
        if !removed {
            return false;
        }

        ids.retain(|_, set| !set.is_empty());
        if ids.is_empty() {
            data.integrations.remove(integration);
        }
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Write pending changes to the backing file. Blocks on file I/O.
    ///
    /// Returns whether anything was written. After a failed write the
    /// changes stay pending.
    pub fn flush(&self) -> Result<bool, RegistryError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let contents = {
            let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_string_pretty(&*data)
        };
        let result = contents
            .map_err(RegistryError::from)
            .and_then(|contents| write_atomic(path, &contents));
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result.map(|()| true)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), RegistryError> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, contents).map_err(|source| RegistryError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
