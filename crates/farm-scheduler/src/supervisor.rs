//! Ties the scheduler and the update watch together for one process run.

use std::sync::Arc;

use anyhow::{Context, Result};
use semver::Version;
use tracing::{info, warn};

use crate::scheduler::{RunSummary, Scheduler};
use crate::update_watch::{UpdateWatch, VersionSource};

/// What the process should do once supervision returns.
#[derive(Debug)]
pub enum Outcome {
    /// Every session stopped; exit.
    Finished(RunSummary),
    /// An update was installed; re-exec the binary.
    Restart {
        summary: RunSummary,
        version: Version,
    },
}

impl Outcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Outcome::Finished(summary) | Outcome::Restart { summary, .. } => summary,
        }
    }
}

/// Run `scheduler` to completion alongside an optional update watch.
///
/// When the run ends because an update was found, the update is applied
/// after every session has stopped and [`Outcome::Restart`] is returned.
pub async fn supervise(scheduler: &mut Scheduler, watch: Option<UpdateWatch>) -> Result<Outcome> {
    let source: Option<Arc<dyn VersionSource>> = watch.as_ref().map(UpdateWatch::source);
    let watch_task = watch.map(|w| tokio::spawn(w.run()));

    let summary = scheduler.await_completion().await;

    if let Some(task) = watch_task {
        task.abort();
        if let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "update watch task failed");
        }
    }

    let Some(version) = summary.update_version() else {
        return Ok(Outcome::Finished(summary));
    };
    let version = Version::parse(version)
        .with_context(|| format!("invalid update version '{version}'"))?;
    let source = source.context("update requested without a version source")?;
    source
        .apply_update(&version)
        .await
        .with_context(|| format!("failed to install v{version}"))?;
    info!(version = %version, "update installed; restart required");
    Ok(Outcome::Restart { summary, version })
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
