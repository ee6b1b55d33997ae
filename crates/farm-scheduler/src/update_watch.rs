//! Background check for newer releases.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use farm_core::{StopReason, StopSignal};
use semver::Version;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Where versions come from and how an update is installed.
#[async_trait]
pub trait VersionSource: Send + Sync {
    fn current_version(&self) -> Version;

    async fn latest_version(&self) -> Result<Version>;

    /// Install `version`. Called once every session has stopped.
    async fn apply_update(&self, version: &Version) -> Result<()>;
}

/// Result of one version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    UpToDate,
    /// Newer version found but `AUTO_UPDATE` is off.
    Available(Version),
    /// Newer version found and the global stop was raised for it.
    Ready(Version),
}

pub struct UpdateWatch {
    source: Arc<dyn VersionSource>,
    interval: Duration,
    auto_update: bool,
    stop: StopSignal,
}

impl UpdateWatch {
    pub fn new(
        source: Arc<dyn VersionSource>,
        interval: Duration,
        auto_update: bool,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            interval,
            auto_update,
            stop,
        }
    }

    pub fn source(&self) -> Arc<dyn VersionSource> {
        self.source.clone()
    }

    /// Query the source once.
    pub async fn tick(&self) -> Result<UpdateCheck> {
        let current = self.source.current_version();
        let latest = self.source.latest_version().await?;
        if latest <= current {
            debug!(current = %current, latest = %latest, "up to date");
            return Ok(UpdateCheck::UpToDate);
        }
        if !self.auto_update {
            info!(current = %current, latest = %latest, "update available; auto-update disabled");
            return Ok(UpdateCheck::Available(latest));
        }
        info!(current = %current, latest = %latest, "update available; stopping sessions");
        self.stop.raise(StopReason::Update {
            version: latest.to_string(),
        });
        Ok(UpdateCheck::Ready(latest))
    }

    /// Check every interval until an update is ready (returned) or the
    /// global stop is raised elsewhere (`None`).
    pub async fn run(self) -> Option<Version> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.raised() => return None,
            }
            match self.tick().await {
                Ok(UpdateCheck::Ready(version)) => return Some(version),
                Ok(UpdateCheck::UpToDate | UpdateCheck::Available(_)) => {}
                Err(err) => warn!(
                    error = %format!("{err:#}"),
                    "update check failed; retrying next interval"
                ),
            }
        }
    }
}
