//! Shared handle over the durable config document.
//!
//! All readers take a [`ConfigStore::snapshot`]; all writers go through
//! [`ConfigStore::update`], which persists before the change becomes
//! visible to anyone else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::config::NodeConfig;
use super::RepoError;

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<NodeConfig>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// Load the config file at `path`. A missing or corrupt file is an error:
    /// the repo must have been initialized first.
    pub fn load(path: &Path) -> Result<Self, RepoError> {
        let data = std::fs::read_to_string(path).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str::<NodeConfig>(&data).map_err(|source| {
            RepoError::Corrupt {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("Loaded config from {:?}", path);

        Ok(Self::with_config(path.to_path_buf(), config))
    }

    pub(crate) fn with_config(path: PathBuf, config: NodeConfig) -> Self {
        Self {
            path,
            current: Mutex::new(config),
            generation: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current config.
    pub fn snapshot(&self) -> NodeConfig {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read-modify-persist. `f` edits a copy; the copy is written to disk and
    /// only then replaces the in-memory config. On a write failure nothing
    /// changes.
    ///
    /// Blocking: the write and rename happen under the lock on the calling
    /// thread. Only startup code calls this today; a caller on a long-running
    /// task should go through `tokio::task::spawn_blocking`.
    pub fn update<F, R>(&self, f: F) -> Result<R, RepoError>
    where
        F: FnOnce(&mut NodeConfig) -> R,
    {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = current.clone();
        let result = f(&mut next);

        write_config(&self.path, &next)?;
        *current = next;
        self.generation.fetch_add(1, Ordering::SeqCst);

        Ok(result)
    }

    /// Number of successful writes through this handle.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Atomic write: `.tmp` sibling then rename.
pub(crate) fn write_config(path: &Path, config: &NodeConfig) -> Result<(), RepoError> {
    let io_err = |source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|source| RepoError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
