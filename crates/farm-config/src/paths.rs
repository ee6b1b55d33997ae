use std::path::{Path, PathBuf};

/// XDG app name used for the config directory.
pub const APP_NAME: &str = "tapfarm";
/// File name looked up in the working directory and the config directory.
pub const SETTINGS_FILE: &str = "tapfarm.toml";
pub const ACCOUNTS_FILE: &str = "accounts.toml";
pub const PROXIES_FILE: &str = "proxies.txt";

/// Platform config directory (`~/.config/tapfarm` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Resolve a config file for reading.
///
/// Lookup order: explicit path, `./{file_name}`, `{config_dir}/{file_name}`.
/// An explicit path is returned even if it does not exist so the caller
/// reports the missing file instead of silently using defaults.
pub fn resolve(explicit: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    resolve_in(explicit, Path::new("."), config_dir().as_deref(), file_name)
}

fn resolve_in(
    explicit: Option<&Path>,
    cwd: &Path,
    config_dir: Option<&Path>,
    file_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = cwd.join(file_name);
    if local.exists() {
        return Some(local);
    }
    config_dir
        .map(|dir| dir.join(file_name))
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_path_wins_even_if_missing() {
        let dir = tempdir().unwrap();
        let explicit = dir.path().join("nope.toml");
        let resolved = resolve_in(Some(&explicit), dir.path(), None, SETTINGS_FILE);
        assert_eq!(resolved, Some(explicit));
    }

    #[test]
    fn test_cwd_before_config_dir() {
        let cwd = tempdir().unwrap();
        let cfg = tempdir().unwrap();
        std::fs::write(cwd.path().join(SETTINGS_FILE), "").unwrap();
        std::fs::write(cfg.path().join(SETTINGS_FILE), "").unwrap();

        let resolved = resolve_in(None, cwd.path(), Some(cfg.path()), SETTINGS_FILE);
        assert_eq!(resolved, Some(cwd.path().join(SETTINGS_FILE)));
    }

    #[test]
    fn test_falls_back_to_config_dir() {
        let cwd = tempdir().unwrap();
        let cfg = tempdir().unwrap();
        std::fs::write(cfg.path().join(ACCOUNTS_FILE), "").unwrap();

        let resolved = resolve_in(None, cwd.path(), Some(cfg.path()), ACCOUNTS_FILE);
        assert_eq!(resolved, Some(cfg.path().join(ACCOUNTS_FILE)));
    }

    #[test]
    fn test_nothing_found() {
        let cwd = tempdir().unwrap();
        assert_eq!(resolve_in(None, cwd.path(), None, PROXIES_FILE), None);
    }
}
