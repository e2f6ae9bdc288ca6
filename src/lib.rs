use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod licensing;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod repo;
pub mod report;
pub mod service;
pub mod version;

use cli::{Cli, Commands};
use service::{run_daemon, shutdown, Collaborators, DaemonOptions};

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::setup_logging();

    let repo_root = cli.repo_dir.unwrap_or_else(cli::default_repo_dir);

    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Daemon(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(daemon(args.into_options(repo_root)))
        }
    }
}

async fn daemon(options: DaemonOptions) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let _signals = shutdown::spawn_signal_handler(cancel.clone());

    let collaborators = Collaborators::standard()?.with_migration_prompt(|found, expected| {
        cli::yes_no_prompt(&format!(
            "Found outdated fs-repo (version {}, expected {}), would you like to migrate? [y/N]",
            found, expected
        ))
    });

    run_daemon(options, collaborators, cancel).await?;
    Ok(())
}
