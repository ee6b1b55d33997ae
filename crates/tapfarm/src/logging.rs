//! Tracing subscriber setup: stderr always, plus an optional daily log file.
//!
//! The subscriber is installed before settings are read so that config
//! warnings are visible; `DEBUG_LOGGING` is applied afterwards through a
//! reload handle.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Filter directives: `RUST_LOG` when set, else `debug` with
/// `DEBUG_LOGGING`, else `info`.
pub(crate) fn filter_directives(rust_log: Option<&str>, debug_logging: bool) -> String {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => directives.to_string(),
        None if debug_logging => "debug".to_string(),
        None => "info".to_string(),
    }
}

/// Keeps the file writer flushing and the filter adjustable.
pub(crate) struct Logging {
    filter: reload::Handle<EnvFilter, Registry>,
    rust_log: Option<String>,
    _guard: Option<WorkerGuard>,
}

impl Logging {
    pub(crate) fn apply_debug_logging(&self, debug_logging: bool) -> Result<()> {
        let directives = filter_directives(self.rust_log.as_deref(), debug_logging);
        let filter = EnvFilter::try_new(directives).context("Invalid log filter")?;
        self.filter
            .reload(filter)
            .context("Failed to update log filter")
    }
}

pub(crate) fn init(log_dir: Option<&Path>) -> Result<Logging> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(filter_directives(rust_log.as_deref(), false))
        .context("Invalid RUST_LOG directives")?;
    let (filter, handle) = reload::Layer::new(filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("tapfarm")
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .ok();

    Ok(Logging {
        filter: handle,
        rust_log,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins() {
        assert_eq!(
            filter_directives(Some("farm_session=trace"), true),
            "farm_session=trace"
        );
    }

    #[test]
    fn test_debug_logging_fallback() {
        assert_eq!(filter_directives(None, true), "debug");
        assert_eq!(filter_directives(Some("  "), true), "debug");
        assert_eq!(filter_directives(None, false), "info");
    }
}
