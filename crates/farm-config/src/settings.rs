//! Farm settings (`tapfarm.toml`).
//!
//! Keys are the upper-case names operators already use in `.env` files
//! (`USE_PROXY`, `SLEEP_BETWEEN_TAP`, ...). Every key can be overridden by an
//! environment variable of the same name. The loaded value is immutable and
//! handed to the scheduler and workers once.

use anyhow::{Context, Result, bail};
use farm_core::IntRange;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    // Proxies
    pub use_proxy: bool,
    pub sessions_per_proxy: u32,
    pub disable_proxy_replace: bool,

    // Accounts
    #[serde(deserialize_with = "deserialize_name_list")]
    pub blacklisted_sessions: Vec<String>,
    pub ref_id: String,
    pub device_params: bool,

    // Pacing
    /// Upper bound (seconds) of the randomized per-session start delay.
    pub session_start_delay: u64,
    pub sleep_between_tap: IntRange,
    pub sleep_by_min_energy: IntRange,
    pub random_taps_count: IntRange,
    pub min_available_energy: u64,
    /// Cap the long sleep by the time needed to recover `MIN_AVAILABLE_ENERGY`.
    pub cap_sleep_by_recovery: bool,
    pub checkin_interval: u64,

    // Upgrades
    pub max_tap_level: u64,
    pub max_energy_level: u64,
    pub max_charge_level: u64,

    // Failure handling
    pub max_retries: u32,
    pub retry_base_delay: u64,
    pub retry_max_delay: u64,
    pub action_failure_budget: u32,
    pub call_timeout: u64,
    pub proxy_wait: u64,
    pub auth_ttl: u64,
    pub stop_ack_timeout: u64,
    pub worker_restart_limit: u32,

    // Updates
    pub auto_update: bool,
    pub check_update_interval: u64,
    /// `owner/name` of the GitHub repository releases are fetched from.
    /// Empty disables the update watch.
    pub update_repository: String,

    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_proxy: true,
            sessions_per_proxy: 1,
            disable_proxy_replace: false,
            blacklisted_sessions: Vec::new(),
            ref_id: String::new(),
            device_params: false,
            session_start_delay: 360,
            sleep_between_tap: IntRange::new(3, 8),
            sleep_by_min_energy: IntRange::new(1800, 10800),
            random_taps_count: IntRange::new(35, 100),
            min_available_energy: 10,
            cap_sleep_by_recovery: true,
            checkin_interval: 3600,
            max_tap_level: 10,
            max_energy_level: 10,
            max_charge_level: 10,
            max_retries: 5,
            retry_base_delay: 5,
            retry_max_delay: 300,
            action_failure_budget: 3,
            call_timeout: 60,
            proxy_wait: 300,
            auth_ttl: 3600,
            stop_ack_timeout: 30,
            worker_restart_limit: 3,
            auto_update: true,
            check_update_interval: 300,
            update_repository: String::new(),
            debug_logging: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Bool,
    Int,
    Range,
    List,
    Str,
}

/// Every recognised key and how its environment override is parsed.
const ENV_KEYS: &[(&str, EnvKind)] = &[
    ("USE_PROXY", EnvKind::Bool),
    ("SESSIONS_PER_PROXY", EnvKind::Int),
    ("DISABLE_PROXY_REPLACE", EnvKind::Bool),
    ("BLACKLISTED_SESSIONS", EnvKind::List),
    ("REF_ID", EnvKind::Str),
    ("DEVICE_PARAMS", EnvKind::Bool),
    ("SESSION_START_DELAY", EnvKind::Int),
    ("SLEEP_BETWEEN_TAP", EnvKind::Range),
    ("SLEEP_BY_MIN_ENERGY", EnvKind::Range),
    ("RANDOM_TAPS_COUNT", EnvKind::Range),
    ("MIN_AVAILABLE_ENERGY", EnvKind::Int),
    ("CAP_SLEEP_BY_RECOVERY", EnvKind::Bool),
    ("CHECKIN_INTERVAL", EnvKind::Int),
    ("MAX_TAP_LEVEL", EnvKind::Int),
    ("MAX_ENERGY_LEVEL", EnvKind::Int),
    ("MAX_CHARGE_LEVEL", EnvKind::Int),
    ("MAX_RETRIES", EnvKind::Int),
    ("RETRY_BASE_DELAY", EnvKind::Int),
    ("RETRY_MAX_DELAY", EnvKind::Int),
    ("ACTION_FAILURE_BUDGET", EnvKind::Int),
    ("CALL_TIMEOUT", EnvKind::Int),
    ("PROXY_WAIT", EnvKind::Int),
    ("AUTH_TTL", EnvKind::Int),
    ("STOP_ACK_TIMEOUT", EnvKind::Int),
    ("WORKER_RESTART_LIMIT", EnvKind::Int),
    ("AUTO_UPDATE", EnvKind::Bool),
    ("CHECK_UPDATE_INTERVAL", EnvKind::Int),
    ("UPDATE_REPOSITORY", EnvKind::Str),
    ("DEBUG_LOGGING", EnvKind::Bool),
];

impl Settings {
    /// Load from `path` (if given and present) and apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Settings::load`] with an injectable environment lookup.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut table = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings: {}", path.display()))?;
                toml::from_str::<toml::Table>(&content)
                    .with_context(|| format!("Failed to parse settings: {}", path.display()))?
            }
            None => toml::Table::new(),
        };

        warn_unknown_keys(&table);

        for (key, kind) in ENV_KEYS {
            let Some(raw) = env(key) else { continue };
            if raw.trim().is_empty() {
                continue;
            }
            let value = parse_env_value(&raw, *kind)
                .with_context(|| format!("Invalid value for {key} from environment: {raw:?}"))?;
            table.insert((*key).to_string(), value);
        }

        toml::Value::Table(table)
            .try_into()
            .context("Failed to interpret settings")
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklisted_sessions.iter().any(|s| s == name)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn proxy_wait(&self) -> Duration {
        Duration::from_secs(self.proxy_wait)
    }

    pub fn auth_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_ttl)
    }

    pub fn checkin_interval(&self) -> Duration {
        Duration::from_secs(self.checkin_interval)
    }

    pub fn stop_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_ack_timeout)
    }

    pub fn check_update_interval(&self) -> Duration {
        Duration::from_secs(self.check_update_interval)
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `min(RETRY_BASE_DELAY * 2^(attempt-1), RETRY_MAX_DELAY)`.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let secs = self
            .retry_base_delay
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay);
        Duration::from_secs(secs)
    }

    /// Render as TOML (used by `tapfarm config`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize settings")
    }
}

fn warn_unknown_keys(table: &toml::Table) {
    for key in table.keys() {
        if !ENV_KEYS.iter().any(|(known, _)| known == key) {
            tracing::warn!(key = %key, "ignoring unknown settings key");
        }
    }
}

fn parse_env_value(raw: &str, kind: EnvKind) -> Result<toml::Value> {
    let raw = raw.trim();
    match kind {
        EnvKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => bail!("expected a boolean"),
        },
        EnvKind::Int => Ok(toml::Value::Integer(parse_int(raw)?)),
        EnvKind::Range => {
            let inner = raw.trim_start_matches('[').trim_end_matches(']');
            let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
            let [lo, hi] = parts.as_slice() else {
                bail!("expected two comma-separated integers");
            };
            Ok(toml::Value::Array(vec![
                toml::Value::Integer(parse_int(lo)?),
                toml::Value::Integer(parse_int(hi)?),
            ]))
        }
        EnvKind::List | EnvKind::Str => Ok(toml::Value::String(raw.to_string())),
    }
}

fn parse_int(raw: &str) -> Result<i64> {
    let value: i64 = raw.parse().context("expected an integer")?;
    if value < 0 {
        bail!("expected a non-negative integer");
    }
    Ok(value)
}

/// Accept either `"a, b"` (the `.env` convention) or `["a", "b"]`.
fn deserialize_name_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameList {
        Csv(String),
        List(Vec<String>),
    }

    let names = match NameList::deserialize(deserializer)? {
        NameList::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        NameList::List(list) => list,
    };
    Ok(names
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
