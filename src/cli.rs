use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{value_parser, Args, Parser, Subcommand};

use crate::licensing::VerifyOverrides;
use crate::service::DaemonOptions;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the node repository (default: ~/.udfs)
    #[arg(long, global = true, env = "UDFS_PATH", value_name = "DIR")]
    pub repo_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a network-connected storage node
    Daemon(DaemonArgs),

    /// Show daemon, repo and system versions
    Version,
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Initialize the repo with default settings if it does not exist
    #[arg(long)]
    pub init: bool,

    /// Run offline: no license check, no usage reports, local API only
    #[arg(long)]
    pub offline: bool,

    /// Mount UDFS and IPNS to the filesystem
    #[arg(long)]
    pub mount: bool,

    /// Path to the mountpoint for UDFS (default: Mounts.UDFS)
    #[arg(long, value_name = "DIR")]
    pub mount_udfs: Option<PathBuf>,

    /// Path to the mountpoint for IPNS (default: Mounts.IPNS)
    #[arg(long, value_name = "DIR")]
    pub mount_ipns: Option<PathBuf>,

    /// Enable automatic periodic repo garbage collection
    #[arg(long)]
    pub enable_gc: bool,

    /// If true, assume yes at the migrate prompt. If false, assume no
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = value_parser!(bool))]
    pub migrate: Option<bool>,

    /// Enable writing objects (with POST, PUT and DELETE)
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = value_parser!(bool))]
    pub writable: Option<bool>,

    /// Override the API listen address (e.g. /ip4/127.0.0.1/tcp/5001)
    #[arg(long, value_name = "ADDR")]
    pub api: Option<String>,

    /// Funding transaction id. NOTE: it will save to config
    #[arg(long)]
    pub txid: Option<String>,

    /// Funding output index. NOTE: it will save to config
    #[arg(long, allow_negative_numbers = true)]
    pub voutid: Option<i32>,

    /// Node secret (base64). NOTE: it will save to config
    #[arg(long)]
    pub secret: Option<String>,

    /// Reporting account. NOTE: it will save to config
    #[arg(long)]
    pub account: Option<String>,
}

impl DaemonArgs {
    pub fn into_options(self, repo_root: PathBuf) -> DaemonOptions {
        DaemonOptions {
            repo_root,
            init: self.init,
            offline: self.offline,
            mount: self.mount,
            mount_udfs: self.mount_udfs,
            mount_ipns: self.mount_ipns,
            enable_gc: self.enable_gc,
            migrate: self.migrate,
            writable: self.writable,
            api: self.api,
            overrides: VerifyOverrides {
                txid: self.txid,
                voutid: self.voutid,
                secret: self.secret,
                account: self.account,
            },
        }
    }
}

pub fn default_repo_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".udfs"))
        .unwrap_or_else(|| PathBuf::from(".udfs"))
}

/// Ask on stdin. Anything but `y`/`Y` within three tries means no.
pub fn yes_no_prompt(prompt: &str) -> bool {
    let stdin = std::io::stdin();
    yes_no_prompt_from(prompt, &mut stdin.lock(), &mut std::io::stdout())
}

pub fn yes_no_prompt_from<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> bool {
    for _ in 0..3 {
        let _ = write!(output, "{} ", prompt);
        let _ = output.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        match line.trim() {
            "y" | "Y" => return true,
            "n" | "N" | "" => return false,
            _ => {
                let _ = writeln!(output, "Please press either 'y' or 'n'");
            }
        }
    }
    false
}
