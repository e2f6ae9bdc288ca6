//! Daemon orchestration.
//!
//! Startup runs in a fixed order and any failure aborts the stages after
//! it: repo lock and migrations, option overrides, license verification
//! (online only), node construction, API listeners, filesystem mount, GC,
//! gateway listeners, usage reporter. Each running subsystem owns one
//! error channel; the channels are merged and the first error ends the
//! daemon.

pub mod gc;
pub mod handle;
pub mod http;
pub mod merge;
pub mod shutdown;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::licensing::storage::apply_overrides;
use crate::licensing::{self, LicenseError, TrustAuthority, UCenterClient, VerifyOverrides};
use crate::node::{Exchange, FsStorage, LedgerBook, Mounter, Node, NodeError, StorageEngine};
use crate::repo::{ExternalMigrator, Migrator, NodeConfig, Repo, RepoError};
use crate::report::UsageReporter;
use crate::version;

pub use handle::{ServiceHandle, ServiceSet};
pub use merge::merge;

/// Failure of a running subsystem, delivered over its error channel.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} server failed: {source}")]
    Serve {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("garbage collection failed: {0}")]
    Gc(#[source] NodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("repo version {found} needs migration to {expected}; run with --migrate to upgrade")]
    MigrationRefused { found: u32, expected: u32 },

    #[error(transparent)]
    License(#[from] LicenseError),

    #[error("Missing Account in report config (use --account)")]
    MissingAccount,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("invalid listen address {0:?}")]
    InvalidListenAddr(String),

    #[error("serve {service}: failed to listen on {addr}: {source}")]
    Bind {
        service: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Datastore.GCPeriod of {0:?} is out of range")]
    InvalidGcPeriod(Duration),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Daemon command-line options.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub repo_root: PathBuf,
    pub init: bool,
    pub offline: bool,
    pub mount: bool,
    pub mount_udfs: Option<PathBuf>,
    pub mount_ipns: Option<PathBuf>,
    pub enable_gc: bool,
    /// `None` asks before migrating.
    pub migrate: Option<bool>,
    /// `None` uses `Gateway.Writable`.
    pub writable: Option<bool>,
    /// Replaces `Addresses.API`.
    pub api: Option<String>,
    pub overrides: VerifyOverrides,
}

type MigrationPrompt = Box<dyn Fn(u32, u32) -> bool + Send + Sync>;

/// External services the daemon talks to.
pub struct Collaborators {
    pub authority: Arc<dyn TrustAuthority>,
    pub migrator: Arc<dyn Migrator>,
    /// Defaults to a filesystem store under `{repo}/blocks`.
    pub storage: Option<Arc<dyn StorageEngine>>,
    pub exchange: Arc<dyn Exchange>,
    pub mounter: Option<Arc<dyn Mounter>>,
    confirm_migration: MigrationPrompt,
}

impl Collaborators {
    pub fn new(authority: Arc<dyn TrustAuthority>) -> Self {
        Self {
            authority,
            migrator: Arc::new(ExternalMigrator::default()),
            storage: None,
            exchange: Arc::new(LedgerBook::new()),
            mounter: None,
            confirm_migration: Box::new(|_, _| false),
        }
    }

    /// HTTP trust authority client and default local collaborators.
    pub fn standard() -> Result<Self, DaemonError> {
        Ok(Self::new(Arc::new(UCenterClient::new()?)))
    }

    /// Asked with `(found, expected)` when the repo is outdated and
    /// `--migrate` was not given.
    pub fn with_migration_prompt(
        mut self,
        prompt: impl Fn(u32, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_migration = Box::new(prompt);
        self
    }
}

/// Run the daemon until `cancel` fires or a subsystem fails.
///
/// Every task started here is cancelled and joined before returning, and
/// the node is closed, whatever the outcome.
#[instrument(name = "daemon", skip_all, fields(repo = %options.repo_root.display()))]
pub async fn run_daemon(
    options: DaemonOptions,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    println!("Initializing daemon...");
    version::print_version();

    let root = options.repo_root.as_path();
    if options.init && !Repo::is_initialized(root) {
        info!("Initializing new repo at {:?}", root);
        Repo::init(root, &NodeConfig::init_defaults())?;
    }

    let repo = open_repo(root, options.migrate, &collaborators)?;
    let store = repo.config().clone();

    apply_overrides(&store, &options.overrides)?;

    let online = !options.offline;
    if online {
        let config = store.snapshot();
        licensing::check_verify_info(&config.verify)?;
        licensing::check_ucenter_info(&config.ucenter)?;
        if config.report.account.is_empty() {
            return Err(DaemonError::MissingAccount);
        }

        let verified = licensing::verify(&store, collaborators.authority.as_ref()).await?;
        info!(
            licversion = verified.licversion,
            period = verified.period,
            renewed = verified.renewed,
            "License verified"
        );
    } else {
        info!("Running offline, license verification skipped");
    }

    let config = store.snapshot();
    let storage: Arc<dyn StorageEngine> = match collaborators.storage {
        Some(storage) => storage,
        None => Arc::new(FsStorage::new(repo.blocks_dir())),
    };
    let mut node = Node::new(
        config.identity.peer_id.clone(),
        online,
        storage,
        collaborators.exchange,
    );
    if let Some(mounter) = collaborators.mounter {
        node = node.with_mounter(mounter);
    }
    let node = Arc::new(node);

    let cancel = cancel.child_token();
    let mut services = ServiceSet::default();

    let result = start_and_wait(
        &options,
        &repo,
        &config,
        node.clone(),
        &mut services,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    services.join().await;
    node.close();

    result
}

fn open_repo(
    root: &Path,
    migrate: Option<bool>,
    collaborators: &Collaborators,
) -> Result<Repo, DaemonError> {
    match Repo::open(root) {
        Err(RepoError::NeedMigration { found, expected }) => {
            let allowed = migrate.unwrap_or_else(|| (collaborators.confirm_migration)(found, expected));
            if !allowed {
                return Err(DaemonError::MigrationRefused { found, expected });
            }
            collaborators.migrator.run_migration(root, expected)?;
            info!("Repo migrated to version {}", expected);
            Ok(Repo::open(root)?)
        }
        other => Ok(other?),
    }
}

async fn start_and_wait(
    options: &DaemonOptions,
    repo: &Repo,
    config: &NodeConfig,
    node: Arc<Node>,
    services: &mut ServiceSet,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    // API
    let api_addrs = match &options.api {
        Some(addr) => vec![addr.clone()],
        None => config.addresses.api.clone(),
    };
    let listeners = http::bind_listeners("API", &api_addrs).await?;
    for (i, (addr, listener)) in listeners.into_iter().enumerate() {
        println!("API server listening on {}", addr);
        if i == 0 {
            repo.set_api_addr(addr)?;
        }
        services.add(Some(http::serve(
            "API",
            listener,
            http::api_router(node.clone()),
            cancel.clone(),
        )));
    }

    // Mount
    if options.mount {
        let udfs = options
            .mount_udfs
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.mounts.udfs));
        let ipns = options
            .mount_ipns
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.mounts.ipns));
        node.mount(&udfs, &ipns)?;
    }

    // GC
    services.add(gc::maybe_run_gc(
        options.enable_gc,
        node.clone(),
        Duration::from_secs(config.datastore.gc_period_secs),
        cancel.clone(),
    )?);

    // Gateway
    if !config.addresses.gateway.is_empty() {
        let writable = options.writable.unwrap_or(config.gateway.writable);
        let mode = if writable { "writable" } else { "readonly" };
        let listeners = http::bind_listeners("Gateway", &config.addresses.gateway).await?;
        for (addr, listener) in listeners {
            println!("Gateway ({}) server listening on {}", mode, addr);
            services.add(Some(http::serve(
                "Gateway",
                listener,
                http::gateway_router(writable),
                cancel.clone(),
            )));
        }
    }

    // Usage reporter
    if node.is_online() && !config.report.address.is_empty() {
        let reporter = UsageReporter::new(repo.config().clone(), node.clone());
        let reporter_cancel = cancel.clone();
        services.add(Some(ServiceHandle::spawn("reporter", async move {
            // Configuration problems stop the reporter, not the daemon.
            if let Err(e) = reporter.run(reporter_cancel).await {
                error!("Usage reporter not started: {}", e);
            }
            Ok(())
        })));
    }

    println!("Daemon is ready");

    let mut errors = merge(services.take_errors().into_iter().map(Some));
    match errors.recv().await {
        Some(err) => {
            error!("Shutting down: {}", err);
            Err(err.into())
        }
        None => Ok(()),
    }
}
