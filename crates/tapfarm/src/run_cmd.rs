//! `tapfarm run`: start every active account against the built-in
//! simulated backend and supervise until stopped.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use farm_config::Settings;
use farm_core::{OutputFormat, StopReason, StopSignal};
use farm_proxy::ProxyPool;
use farm_scheduler::{Outcome, RunSummary, Scheduler, UpdateWatch, supervise};
use farm_session::sim::SimBackend;
use farm_session::{SessionContext, SessionReport, pool_policy};
use semver::Version;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::FileArgs;
use crate::config_cmds::{load_accounts, load_proxy_list};
use crate::self_update::GithubReleases;

/// Returns the installed version when the process should restart.
pub(crate) async fn handle_run(
    files: &FileArgs,
    settings: Settings,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<Option<Version>> {
    let store = load_accounts(files, &settings)?;
    let proxies = load_proxy_list(files, &settings)?;
    let settings = Arc::new(settings);
    let stop = StopSignal::new();
    let watch = update_watch(&settings, stop.clone())?;

    let sim = Arc::new(SimBackend::new());
    let ctx = SessionContext {
        pool: ProxyPool::new(proxies, pool_policy(&settings)),
        settings,
        transport: sim.clone(),
        game: sim,
        stop: stop.clone(),
        seed,
    };
    let mut scheduler = Scheduler::new(ctx);
    if scheduler.start(store.active().cloned()) == 0 {
        bail!(
            "No active accounts to run ({} configured, all blacklisted)",
            store.len()
        );
    }

    let operator = tokio::spawn(operator_stop(stop));
    let outcome = supervise(&mut scheduler, watch).await;
    operator.abort();
    let outcome = outcome?;

    print_summary(outcome.summary(), format)?;
    Ok(match outcome {
        Outcome::Restart { version, .. } => Some(version),
        Outcome::Finished(_) => None,
    })
}

fn update_watch(settings: &Settings, stop: StopSignal) -> Result<Option<UpdateWatch>> {
    if settings.update_repository.trim().is_empty() {
        info!("UPDATE_REPOSITORY not set; update watch disabled");
        return Ok(None);
    }
    let source = GithubReleases::new(&settings.update_repository)?;
    Ok(Some(UpdateWatch::new(
        Arc::new(source),
        settings.check_update_interval(),
        settings.auto_update,
        stop,
    )))
}

/// Raise the global stop on ctrl-c.
async fn operator_stop(stop: StopSignal) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("ctrl-c received; stopping sessions");
                stop.raise(StopReason::Operator);
            }
            Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
        },
        _ = stop.raised() => {}
    }
}

#[derive(Serialize)]
struct SummaryOutput<'a> {
    stop: Option<String>,
    sessions: &'a [SessionReport],
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = SummaryOutput {
                stop: summary.stop.as_ref().map(ToString::to_string),
                sessions: &summary.reports,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for report in &summary.reports {
                println!("{report}");
            }
            match &summary.stop {
                Some(reason) => println!("stopped: {reason}"),
                None => println!("stopped: {}", StopReason::Drained),
            }
        }
    }
    Ok(())
}

/// Replace this process with the freshly installed binary, same arguments.
#[cfg(unix)]
pub(crate) fn restart_process(version: &Version) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    info!(version = %version, exe = %exe.display(), "restarting into new version");
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).with_context(|| format!("Failed to re-exec {}", exe.display()))
}

#[cfg(not(unix))]
pub(crate) fn restart_process(version: &Version) -> Result<()> {
    bail!("v{version} installed; restart tapfarm manually");
}
