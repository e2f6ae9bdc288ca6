//! Daemon startup, escalation and teardown against a temporary repo.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use udfs_daemon_lib::licensing::keys::node_identity_hash;
use udfs_daemon_lib::licensing::{
    LicenseError, LicenseGrant, NodeKey, PubkeyMap, TrustAuthority, VerifyOverrides,
};
use udfs_daemon_lib::node::{NodeError, StorageEngine};
use udfs_daemon_lib::repo::{
    Migrator, NodeConfig, Repo, RepoError, RepoLock, API_FILE, CONFIG_FILE, REPO_VERSION,
    VERSION_FILE,
};
use udfs_daemon_lib::service::{run_daemon, Collaborators, DaemonError, DaemonOptions, ServiceError};

// ============================================================================
// Helpers
// ============================================================================

/// Issues licenses signed by a fixed key, or fails every request.
struct TestAuthority {
    key: NodeKey,
    node_public_key: String,
    issue: bool,
    requests: AtomicUsize,
}

impl TestAuthority {
    fn issuing() -> Self {
        Self {
            key: NodeKey::from_seed([11u8; 32]),
            node_public_key: node_key().public_key(),
            issue: true,
            requests: AtomicUsize::new(0),
        }
    }

    fn unreachable() -> Self {
        Self {
            issue: false,
            ..Self::issuing()
        }
    }
}

#[async_trait]
impl TrustAuthority for TestAuthority {
    async fn request_license(
        &self,
        _server: &str,
        txid: &str,
        voutid: i32,
    ) -> Result<LicenseGrant, LicenseError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.issue {
            return Err(LicenseError::Network("connection refused".to_string()));
        }
        let period = chrono::Utc::now().timestamp() + 86_400;
        let hash = node_identity_hash(txid, voutid, &self.node_public_key, period, 1);
        Ok(LicenseGrant {
            license: self.key.sign(&hash),
            lic_period: period,
            licversion: 1,
        })
    }

    async fn request_pubkey_map(
        &self,
        _server: &str,
        _txid: &str,
        _voutid: i32,
    ) -> Result<PubkeyMap, LicenseError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.issue {
            return Err(LicenseError::Network("connection refused".to_string()));
        }
        Ok(PubkeyMap::from([(1, self.key.public_key())]))
    }
}

struct FailingStorage;

#[async_trait]
impl StorageEngine for FailingStorage {
    async fn storage_usage(&self) -> Result<u64, NodeError> {
        Ok(0)
    }

    async fn collect_garbage(&self) -> Result<usize, NodeError> {
        Err(NodeError::Task("block store unavailable".to_string()))
    }
}

/// Writes the expected version file, as the real tool would.
struct RecordingMigrator {
    runs: AtomicUsize,
}

impl Migrator for RecordingMigrator {
    fn run_migration(&self, root: &Path, target: u32) -> Result<(), RepoError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        std::fs::write(root.join(VERSION_FILE), target.to_string()).map_err(|source| {
            RepoError::Io {
                path: root.to_path_buf(),
                source,
            }
        })
    }
}

fn node_key() -> NodeKey {
    NodeKey::from_seed([12u8; 32])
}

fn local_config() -> NodeConfig {
    let mut config = NodeConfig::init_defaults();
    config.addresses.api = vec!["127.0.0.1:0".to_string()];
    config.addresses.gateway = vec!["/ip4/127.0.0.1/tcp/0".to_string()];
    config
}

fn online_config() -> NodeConfig {
    let mut config = local_config();
    config.verify.txid = "funding-tx".to_string();
    config.verify.voutid = 1;
    config.verify.secret = node_key().secret();
    config.ucenter.server_address = "http://authority.invalid".to_string();
    config.report.account = "acct".to_string();
    config
}

fn options(dir: &TempDir) -> DaemonOptions {
    DaemonOptions {
        repo_root: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn read_config(dir: &TempDir) -> NodeConfig {
    read_config_at(dir.path())
}

fn read_config_at(root: &Path) -> NodeConfig {
    let data = std::fs::read_to_string(root.join(CONFIG_FILE)).unwrap();
    serde_json::from_str(&data).unwrap()
}

/// The daemon no longer holds the repo.
fn assert_unlocked(dir: &TempDir) {
    if let Err(err) = RepoLock::acquire(dir.path()) {
        panic!("repo still locked: {:?}", err);
    }
}

async fn wait_for_api_file(dir: &TempDir) -> String {
    let path = dir.path().join(API_FILE);
    for _ in 0..500 {
        if let Ok(addr) = std::fs::read_to_string(&path) {
            if !addr.is_empty() {
                return addr;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("API address file never appeared");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_offline_daemon_serves_until_cancelled() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &local_config()).unwrap();
    let peer_id = read_config(&dir).identity.peer_id;

    let authority = Arc::new(TestAuthority::unreachable());
    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(run_daemon(
        DaemonOptions {
            offline: true,
            ..options(&dir)
        },
        Collaborators::new(authority.clone()),
        cancel.clone(),
    ));

    let addr = wait_for_api_file(&dir).await;
    let id: serde_json::Value = reqwest::get(format!("http://{}/api/v0/id", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(id["ID"], peer_id);
    assert!(matches!(
        RepoLock::acquire(dir.path()),
        Err(RepoError::Locked { .. })
    ));

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "{:?}", result);

    // Offline mode never talks to the authority.
    assert_eq!(authority.requests.load(Ordering::SeqCst), 0);
    assert_unlocked(&dir);
}

#[tokio::test]
async fn test_init_creates_missing_repo() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("repo");

    // The bad API address stops startup right after the repo is created.
    let result = run_daemon(
        DaemonOptions {
            repo_root: root.clone(),
            init: true,
            offline: true,
            api: Some("not-an-address".to_string()),
            ..Default::default()
        },
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(DaemonError::InvalidListenAddr(_))));
    assert!(Repo::is_initialized(&root));
    assert_eq!(
        std::fs::read_to_string(root.join(VERSION_FILE)).unwrap(),
        REPO_VERSION.to_string()
    );
    assert!(!read_config_at(&root).identity.peer_id.is_empty());
}

#[tokio::test]
async fn test_missing_repo_without_init_fails() {
    let dir = TempDir::new().unwrap();
    let result = run_daemon(
        options(&dir),
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(
        result,
        Err(DaemonError::Repo(RepoError::NotInitialized(_)))
    ));
}

#[tokio::test]
async fn test_unobtainable_license_aborts_startup() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &online_config()).unwrap();

    let result = run_daemon(
        options(&dir),
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(DaemonError::License(LicenseError::Network(_)))
    ));
    // Nothing was started and the repo is free again.
    assert!(!dir.path().join(API_FILE).exists());
    assert_unlocked(&dir);
}

#[tokio::test]
async fn test_online_requires_account() {
    let dir = TempDir::new().unwrap();
    let mut config = online_config();
    config.report.account.clear();
    Repo::init(dir.path(), &config).unwrap();

    let authority = Arc::new(TestAuthority::issuing());
    let result = run_daemon(
        options(&dir),
        Collaborators::new(authority.clone()),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(DaemonError::MissingAccount)));
    assert_eq!(authority.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overrides_are_saved_before_verification() {
    let dir = TempDir::new().unwrap();
    let mut config = online_config();
    config.report.account.clear();
    Repo::init(dir.path(), &config).unwrap();

    let result = run_daemon(
        DaemonOptions {
            overrides: VerifyOverrides {
                txid: Some("other-tx".to_string()),
                account: Some("new-acct".to_string()),
                ..Default::default()
            },
            ..options(&dir)
        },
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(DaemonError::License(_))));
    let saved = read_config(&dir);
    assert_eq!(saved.verify.txid, "other-tx");
    assert_eq!(saved.report.account, "new-acct");
}

#[tokio::test]
async fn test_online_daemon_verifies_and_persists_license() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &online_config()).unwrap();

    let authority = Arc::new(TestAuthority::issuing());
    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(run_daemon(
        options(&dir),
        Collaborators::new(authority.clone()),
        cancel.clone(),
    ));

    wait_for_api_file(&dir).await;
    let saved = read_config(&dir);
    assert!(!saved.verify.license.is_empty());
    assert_eq!(saved.verify.licversion, 1);
    assert_eq!(saved.ucenter.server_pubkeys.len(), 1);
    assert_eq!(authority.requests.load(Ordering::SeqCst), 2);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_subsystem_failure_shuts_daemon_down() {
    let dir = TempDir::new().unwrap();
    let mut config = local_config();
    config.datastore.gc_period_secs = 1;
    Repo::init(dir.path(), &config).unwrap();

    let mut collaborators = Collaborators::new(Arc::new(TestAuthority::unreachable()));
    collaborators.storage = Some(Arc::new(FailingStorage));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_daemon(
            DaemonOptions {
                offline: true,
                enable_gc: true,
                ..options(&dir)
            },
            collaborators,
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap();

    assert!(matches!(
        result,
        Err(DaemonError::Service(ServiceError::Gc(_)))
    ));
    assert_unlocked(&dir);
}

#[tokio::test]
async fn test_mount_needs_online_node() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &local_config()).unwrap();

    let result = run_daemon(
        DaemonOptions {
            offline: true,
            mount: true,
            ..options(&dir)
        },
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(DaemonError::Node(NodeError::MountOffline))));
}

#[tokio::test]
async fn test_outdated_repo_migration() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &local_config()).unwrap();
    std::fs::write(dir.path().join(VERSION_FILE), "6").unwrap();

    let refused = run_daemon(
        DaemonOptions {
            offline: true,
            ..options(&dir)
        },
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(
        refused,
        Err(DaemonError::MigrationRefused { found: 6, .. })
    ));

    let migrator = Arc::new(RecordingMigrator {
        runs: AtomicUsize::new(0),
    });
    let mut collaborators = Collaborators::new(Arc::new(TestAuthority::unreachable()));
    collaborators.migrator = migrator.clone();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let migrated = run_daemon(
        DaemonOptions {
            offline: true,
            migrate: Some(true),
            ..options(&dir)
        },
        collaborators,
        cancel,
    )
    .await;

    assert!(migrated.is_ok(), "{:?}", migrated);
    assert_eq!(migrator.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_starts_over_lock_left_by_killed_daemon() {
    let dir = TempDir::new().unwrap();
    Repo::init(dir.path(), &local_config()).unwrap();
    std::fs::write(dir.path().join("repo.lock"), "999999").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = run_daemon(
        DaemonOptions {
            offline: true,
            ..options(&dir)
        },
        Collaborators::new(Arc::new(TestAuthority::unreachable())),
        cancel,
    )
    .await;

    assert!(result.is_ok(), "{:?}", result);
    assert_unlocked(&dir);
}
