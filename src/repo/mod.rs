//! On-disk node repository
//!
//! Layout under the repo root:
//! - `config`    node configuration (JSON)
//! - `version`   repo format version
//! - `repo.lock` exclusive lock held while a daemon runs
//! - `api`       address of the running API listener
//! - `blocks/`   local block store

pub mod config;
pub mod lock;
pub mod migrations;
pub mod store;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

pub use config::NodeConfig;
pub use lock::RepoLock;
pub use migrations::{ExternalMigrator, Migrator};
pub use store::ConfigStore;

/// Repo format version this daemon understands.
pub const REPO_VERSION: u32 = 7;

pub const CONFIG_FILE: &str = "config";
pub const VERSION_FILE: &str = "version";
pub const API_FILE: &str = "api";
pub const BLOCKS_DIR: &str = "blocks";

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("no repo found at {0:?} (run with --init to create one)")]
    NotInitialized(PathBuf),

    #[error("repo at {path:?} is locked by another process (pid {owner})")]
    Locked { path: PathBuf, owner: String },

    #[error("repo version {found} needs migration to {expected}")]
    NeedMigration { found: u32, expected: u32 },

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path:?} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("version file {0:?} is not a number")]
    BadVersion(PathBuf),
}

/// An opened, locked repo.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    config: Arc<ConfigStore>,
    // Dropped last: the lock outlives every other field.
    _lock: RepoLock,
}

impl Repo {
    pub fn is_initialized(root: &Path) -> bool {
        root.join(CONFIG_FILE).is_file()
    }

    /// Create a fresh repo at `root` with the given config.
    pub fn init(root: &Path, config: &NodeConfig) -> Result<(), RepoError> {
        std::fs::create_dir_all(root.join(BLOCKS_DIR)).map_err(|source| RepoError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        store::write_config(&root.join(CONFIG_FILE), config)?;
        write_file(&root.join(VERSION_FILE), &REPO_VERSION.to_string())?;
        info!("Initialized repo at {:?} (peer {})", root, config.identity.peer_id);
        Ok(())
    }

    /// Lock the repo, check its format version and load config.
    pub fn open(root: &Path) -> Result<Self, RepoError> {
        if !Self::is_initialized(root) {
            return Err(RepoError::NotInitialized(root.to_path_buf()));
        }

        let lock = RepoLock::acquire(root)?;

        let found = read_version(root)?;
        if found != REPO_VERSION {
            return Err(RepoError::NeedMigration {
                found,
                expected: REPO_VERSION,
            });
        }

        let config = ConfigStore::load(&root.join(CONFIG_FILE))?;

        Ok(Self {
            root: root.to_path_buf(),
            config: Arc::new(config),
            _lock: lock,
        })
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.root.join(BLOCKS_DIR)
    }

    /// Record where the API is listening so local clients can find it.
    pub fn set_api_addr(&self, addr: SocketAddr) -> Result<(), RepoError> {
        write_file(&self.root.join(API_FILE), &addr.to_string())
    }
}

pub(crate) fn read_version(root: &Path) -> Result<u32, RepoError> {
    let path = root.join(VERSION_FILE);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        // Repos created before the version file existed.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => return Err(RepoError::Io { path, source }),
    };
    data.trim()
        .parse::<u32>()
        .map_err(|_| RepoError::BadVersion(path))
}

fn write_file(path: &Path, contents: &str) -> Result<(), RepoError> {
    std::fs::write(path, contents).map_err(|source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    })
}
