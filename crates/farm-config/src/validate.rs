use anyhow::{Result, bail};
use farm_core::IntRange;

use crate::settings::Settings;

/// Reject settings the engine cannot run with.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_ranges(settings)?;
    validate_limits(settings)?;
    warn_suspicious(settings);
    Ok(())
}

fn validate_ranges(settings: &Settings) -> Result<()> {
    let ranges: [(&str, IntRange); 3] = [
        ("SLEEP_BETWEEN_TAP", settings.sleep_between_tap),
        ("SLEEP_BY_MIN_ENERGY", settings.sleep_by_min_energy),
        ("RANDOM_TAPS_COUNT", settings.random_taps_count),
    ];
    for (key, range) in ranges {
        if !range.is_ordered() {
            bail!("{key} lower bound exceeds upper bound (got {range})");
        }
    }
    if settings.random_taps_count.hi == 0 {
        bail!("RANDOM_TAPS_COUNT must allow at least one tap (got {})", settings.random_taps_count);
    }
    if settings.sleep_by_min_energy.hi == 0 {
        bail!("SLEEP_BY_MIN_ENERGY must be > 0 seconds");
    }
    Ok(())
}

fn validate_limits(settings: &Settings) -> Result<()> {
    let nonzero: [(&str, u64); 5] = [
        ("SESSIONS_PER_PROXY", u64::from(settings.sessions_per_proxy)),
        ("CHECK_UPDATE_INTERVAL", settings.check_update_interval),
        ("CALL_TIMEOUT", settings.call_timeout),
        ("STOP_ACK_TIMEOUT", settings.stop_ack_timeout),
        ("AUTH_TTL", settings.auth_ttl),
    ];
    for (key, value) in nonzero {
        if value == 0 {
            bail!("{key} must be > 0 (got 0)");
        }
    }
    if settings.retry_max_delay < settings.retry_base_delay {
        bail!(
            "RETRY_MAX_DELAY ({}) must be >= RETRY_BASE_DELAY ({})",
            settings.retry_max_delay,
            settings.retry_base_delay
        );
    }
    Ok(())
}

fn warn_suspicious(settings: &Settings) {
    if settings.sleep_between_tap.lo == 0 {
        tracing::warn!("SLEEP_BETWEEN_TAP lower bound is 0; sessions may tap back-to-back");
    }
    if settings.auto_update && settings.update_repository.is_empty() {
        tracing::warn!(
            "AUTO_UPDATE is enabled but UPDATE_REPOSITORY is empty; update watch disabled"
        );
    }
}
