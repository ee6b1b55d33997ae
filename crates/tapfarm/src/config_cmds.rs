use anyhow::{Context, Result, bail};
use farm_config::paths::{self, ACCOUNTS_FILE, PROXIES_FILE, SETTINGS_FILE};
use farm_config::{IdentityStore, Settings, load_proxies, validate_settings};
use farm_core::OutputFormat;

use crate::cli::FileArgs;

/// Load `tapfarm.toml` (or defaults when none is found), apply environment
/// overrides and validate.
pub(crate) fn load_settings(files: &FileArgs) -> Result<Settings> {
    let path = paths::resolve(files.config.as_deref(), SETTINGS_FILE);
    let settings = Settings::load(path.as_deref())?;
    validate_settings(&settings).context("Invalid settings")?;
    Ok(settings)
}

pub(crate) fn load_accounts(files: &FileArgs, settings: &Settings) -> Result<IdentityStore> {
    let Some(path) = paths::resolve(files.accounts.as_deref(), ACCOUNTS_FILE) else {
        bail!("No accounts configured: pass --accounts or create {ACCOUNTS_FILE}");
    };
    IdentityStore::load(&path, &settings.blacklisted_sessions)
}

/// Proxy endpoints, empty when `USE_PROXY` is off or no list exists.
pub(crate) fn load_proxy_list(files: &FileArgs, settings: &Settings) -> Result<Vec<String>> {
    if !settings.use_proxy {
        return Ok(Vec::new());
    }
    match paths::resolve(files.proxies.as_deref(), PROXIES_FILE) {
        Some(path) => load_proxies(&path),
        None => {
            tracing::warn!("USE_PROXY is set but no {PROXIES_FILE} was found; connecting directly");
            Ok(Vec::new())
        }
    }
}

/// `tapfarm config`.
pub(crate) fn handle_config(settings: &Settings, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", settings.to_toml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(settings)?),
    }
    Ok(())
}
