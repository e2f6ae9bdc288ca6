//! The storage node and the collaborators the daemon drives.
//!
//! The block store, the exchange ledger and the filesystem bridge sit behind
//! narrow traits. `FsStorage` and `LedgerBook` are the defaults used by the
//! binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::metrics::NodeMetrics;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("mount is not supported in offline mode")]
    MountOffline,

    #[error("no filesystem bridge available")]
    NoMounter,

    #[error("mount failed: {0}")]
    Mount(String),
}

/// Byte counts exchanged with one peer since the previous report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDiff {
    pub peer_id: String,
    pub received: u64,
    pub sent: u64,
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Bytes held in the local block store.
    async fn storage_usage(&self) -> Result<u64, NodeError>;

    /// One garbage-collection sweep; returns the number of entries removed.
    async fn collect_garbage(&self) -> Result<usize, NodeError>;
}

pub trait Exchange: Send + Sync {
    /// Per-peer deltas since the last call. Each delta is returned once.
    fn ledger_diffs(&self) -> Vec<LedgerDiff>;

    /// Per-peer totals since start, for metrics. Not reset by `ledger_diffs`.
    fn ledger_totals(&self) -> Vec<LedgerDiff> {
        Vec::new()
    }
}

pub trait Mounter: Send + Sync {
    fn mount(&self, udfs: &Path, ipns: &Path) -> Result<(), NodeError>;
    fn unmount(&self) -> Result<(), NodeError>;
}

// ============================================================================
// Node
// ============================================================================

pub struct Node {
    peer_id: String,
    online: bool,
    storage: Arc<dyn StorageEngine>,
    exchange: Arc<dyn Exchange>,
    mounter: Option<Arc<dyn Mounter>>,
    mounted: AtomicBool,
    metrics: NodeMetrics,
}

impl Node {
    pub fn new(
        peer_id: impl Into<String>,
        online: bool,
        storage: Arc<dyn StorageEngine>,
        exchange: Arc<dyn Exchange>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            online,
            storage,
            exchange,
            mounter: None,
            mounted: AtomicBool::new(false),
            metrics: NodeMetrics::new(),
        }
    }

    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = Some(mounter);
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn mount(&self, udfs: &Path, ipns: &Path) -> Result<(), NodeError> {
        if !self.online {
            return Err(NodeError::MountOffline);
        }
        let mounter = self.mounter.as_ref().ok_or(NodeError::NoMounter)?;
        mounter.mount(udfs, ipns)?;
        self.mounted.store(true, Ordering::SeqCst);
        println!("UDFS mounted at: {}", udfs.display());
        println!("IPNS mounted at: {}", ipns.display());
        Ok(())
    }

    /// Release what the node holds outside the process. Safe to call twice.
    pub fn close(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            if let Some(mounter) = &self.mounter {
                if let Err(e) = mounter.unmount() {
                    warn!("Unmount failed: {}", e);
                }
            }
        }
        info!(peer_id = %self.peer_id, "Node closed");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer_id", &self.peer_id)
            .field("online", &self.online)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Filesystem block store
// ============================================================================

/// Block store rooted at `{repo}/blocks`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    stale_after: Duration,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stale_after: Duration::from_secs(3600),
        }
    }

    /// Age after which an unfinished `*.tmp` write is swept by GC.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[async_trait]
impl StorageEngine for FsStorage {
    async fn storage_usage(&self) -> Result<u64, NodeError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || dir_size(&root))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
    }

    async fn collect_garbage(&self) -> Result<usize, NodeError> {
        let root = self.root.clone();
        let stale_after = self.stale_after;
        let removed = tokio::task::spawn_blocking(move || sweep_stale(&root, stale_after))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))??;
        debug!(removed, "Garbage collection sweep finished");
        Ok(removed)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> NodeError + '_ {
    move |source| NodeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn dir_size(path: &Path) -> Result<u64, NodeError> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error(path)(e)),
    };

    let mut total = 0u64;
    for entry in entries {
        let entry = entry.map_err(io_error(path))?;
        let meta = entry.metadata().map_err(io_error(&entry.path()))?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

fn sweep_stale(path: &Path, stale_after: Duration) -> Result<usize, NodeError> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error(path)(e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(io_error(path))?;
        let entry_path = entry.path();
        let meta = entry.metadata().map_err(io_error(&entry_path))?;
        if meta.is_dir() {
            removed += sweep_stale(&entry_path, stale_after)?;
            continue;
        }
        if entry_path.extension().and_then(|ext| ext.to_str()) != Some("tmp") {
            continue;
        }
        let stale = meta
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= stale_after);
        if stale {
            std::fs::remove_file(&entry_path).map_err(io_error(&entry_path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

// ============================================================================
// Exchange ledger
// ============================================================================

/// In-memory per-peer transfer counters. Pending deltas are drained on every
/// report; totals only grow.
#[derive(Debug, Default)]
pub struct LedgerBook {
    counters: Mutex<LedgerCounters>,
}

#[derive(Debug, Default)]
struct LedgerCounters {
    pending: BTreeMap<String, (u64, u64)>,
    totals: BTreeMap<String, (u64, u64)>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, peer_id: &str, bytes: u64) {
        self.record(peer_id, |entry| entry.0 = entry.0.saturating_add(bytes));
    }

    pub fn record_sent(&self, peer_id: &str, bytes: u64) {
        self.record(peer_id, |entry| entry.1 = entry.1.saturating_add(bytes));
    }

    fn record(&self, peer_id: &str, add: impl Fn(&mut (u64, u64))) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        add(counters.pending.entry(peer_id.to_string()).or_default());
        add(counters.totals.entry(peer_id.to_string()).or_default());
    }
}

fn to_diffs(entries: BTreeMap<String, (u64, u64)>) -> Vec<LedgerDiff> {
    entries
        .into_iter()
        .map(|(peer_id, (received, sent))| LedgerDiff {
            peer_id,
            received,
            sent,
        })
        .collect()
}

impl Exchange for LedgerBook {
    fn ledger_diffs(&self) -> Vec<LedgerDiff> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        to_diffs(std::mem::take(&mut counters.pending))
    }

    fn ledger_totals(&self) -> Vec<LedgerDiff> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        to_diffs(counters.totals.clone())
    }
}
