use anyhow::Result;
use clap::Parser;

mod cli;
mod config_cmds;
mod logging;
mod run_cmd;
mod self_update;
mod session_cmds;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.clone();

    let log_dir = match &cli.command {
        Commands::Run { log_dir, .. } => log_dir.as_deref(),
        _ => None,
    };
    let logging = logging::init(log_dir)?;

    let settings = config_cmds::load_settings(&cli.files)?;
    logging.apply_debug_logging(settings.debug_logging)?;

    match cli.command {
        Commands::Run { seed, .. } => {
            let restart = run_cmd::handle_run(&cli.files, settings, seed, format).await?;
            if let Some(version) = restart {
                // Flush file output before the image is replaced.
                drop(logging);
                run_cmd::restart_process(&version)?;
            }
        }
        Commands::Sessions => {
            let store = config_cmds::load_accounts(&cli.files, &settings)?;
            let proxies = config_cmds::load_proxy_list(&cli.files, &settings)?;
            session_cmds::handle_sessions(&store, proxies, &settings, format)?;
        }
        Commands::Config => {
            config_cmds::handle_config(&settings, format)?;
        }
        Commands::CheckUpdate { apply } => {
            self_update::handle_check_update(&settings, apply, format).await?;
        }
    }

    Ok(())
}
