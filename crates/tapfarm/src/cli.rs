use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use farm_core::OutputFormat;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TAPFARM_GIT_DESCRIBE"),
    ")"
);

#[derive(Parser)]
#[command(name = "tapfarm", version, long_version = LONG_VERSION)]
#[command(about = "Multi-account tapping farm: one session per account, shared proxy pool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub files: FileArgs,
}

/// Config file locations. Each falls back to `./<file>`, then the
/// platform config directory.
#[derive(Args, Debug, Clone, Default)]
pub struct FileArgs {
    /// Settings file (tapfarm.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Account list (accounts.toml)
    #[arg(long, global = true)]
    pub accounts: Option<PathBuf>,

    /// Proxy list, one endpoint per line (proxies.txt)
    #[arg(long, global = true)]
    pub proxies: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured session until stopped (ctrl-c) or updated
    Run {
        /// Also write a daily-rolling log file into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Seed for session jitter (delays, tap counts)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List accounts with blacklist status and the proxy each would receive
    Sessions,

    /// Print effective settings
    Config,

    /// Check GitHub releases for a newer version
    CheckUpdate {
        /// Install the newer version if one exists
        #[arg(long)]
        apply: bool,
    },
}
