use super::*;
use std::collections::HashMap;
use tempfile::tempdir;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn test_defaults_match_documented_values() {
    let settings = Settings::default();
    assert!(settings.use_proxy);
    assert_eq!(settings.sessions_per_proxy, 1);
    assert!(!settings.disable_proxy_replace);
    assert_eq!(settings.session_start_delay, 360);
    assert_eq!(settings.sleep_between_tap, IntRange::new(3, 8));
    assert_eq!(settings.sleep_by_min_energy, IntRange::new(1800, 10800));
    assert_eq!(settings.random_taps_count, IntRange::new(35, 100));
    assert_eq!(settings.min_available_energy, 10);
    assert_eq!(settings.max_tap_level, 10);
    assert!(settings.auto_update);
    assert_eq!(settings.check_update_interval, 300);
}

#[test]
fn test_load_without_file_uses_defaults() {
    let settings = Settings::load_with_env(None, no_env).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_load_from_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tapfarm.toml");
    std::fs::write(
        &path,
        r#"
USE_PROXY = false
SESSIONS_PER_PROXY = 3
BLACKLISTED_SESSIONS = "alice, bob ,"
SLEEP_BETWEEN_TAP = [1, 2]
RANDOM_TAPS_COUNT = [10, 20]
MAX_CHARGE_LEVEL = 4
"#,
    )
    .unwrap();

    let settings = Settings::load_with_env(Some(&path), no_env).unwrap();
    assert!(!settings.use_proxy);
    assert_eq!(settings.sessions_per_proxy, 3);
    assert_eq!(settings.blacklisted_sessions, vec!["alice", "bob"]);
    assert_eq!(settings.sleep_between_tap, IntRange::new(1, 2));
    assert_eq!(settings.random_taps_count, IntRange::new(10, 20));
    assert_eq!(settings.max_charge_level, 4);
    // untouched keys keep defaults
    assert_eq!(settings.min_available_energy, 10);
}

#[test]
fn test_blacklist_accepts_array() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tapfarm.toml");
    std::fs::write(&path, r#"BLACKLISTED_SESSIONS = ["carol", " dave "]"#).unwrap();

    let settings = Settings::load_with_env(Some(&path), no_env).unwrap();
    assert_eq!(settings.blacklisted_sessions, vec!["carol", "dave"]);
    assert!(settings.is_blacklisted("carol"));
    assert!(!settings.is_blacklisted("alice"));
}

#[test]
fn test_env_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tapfarm.toml");
    std::fs::write(&path, "USE_PROXY = true\nMIN_AVAILABLE_ENERGY = 50\n").unwrap();

    let env = env_from(&[
        ("USE_PROXY", "0"),
        ("MIN_AVAILABLE_ENERGY", "12"),
        ("SLEEP_BY_MIN_ENERGY", "[60, 120]"),
        ("RANDOM_TAPS_COUNT", "5,9"),
        ("BLACKLISTED_SESSIONS", "x,y"),
        ("UPDATE_REPOSITORY", "farmers/tapfarm"),
    ]);
    let settings = Settings::load_with_env(Some(&path), env).unwrap();
    assert!(!settings.use_proxy);
    assert_eq!(settings.min_available_energy, 12);
    assert_eq!(settings.sleep_by_min_energy, IntRange::new(60, 120));
    assert_eq!(settings.random_taps_count, IntRange::new(5, 9));
    assert_eq!(settings.blacklisted_sessions, vec!["x", "y"]);
    assert_eq!(settings.update_repository, "farmers/tapfarm");
}

#[test]
fn test_empty_env_value_is_ignored() {
    let env = env_from(&[("SESSIONS_PER_PROXY", "  ")]);
    let settings = Settings::load_with_env(None, env).unwrap();
    assert_eq!(settings.sessions_per_proxy, 1);
}

#[test]
fn test_invalid_env_value_names_the_key() {
    let env = env_from(&[("AUTO_UPDATE", "maybe")]);
    let err = Settings::load_with_env(None, env).unwrap_err();
    assert!(format!("{err:#}").contains("AUTO_UPDATE"), "error: {err:#}");

    let env = env_from(&[("SLEEP_BETWEEN_TAP", "3")]);
    let err = Settings::load_with_env(None, env).unwrap_err();
    assert!(format!("{err:#}").contains("SLEEP_BETWEEN_TAP"), "error: {err:#}");

    let env = env_from(&[("MAX_RETRIES", "-1")]);
    assert!(Settings::load_with_env(None, env).is_err());
}

#[test]
fn test_missing_explicit_file_is_error() {
    let dir = tempdir().unwrap();
    let err = Settings::load_with_env(Some(&dir.path().join("missing.toml")), no_env).unwrap_err();
    assert!(err.to_string().contains("Failed to read settings"));
}

#[test]
fn test_retry_backoff_doubles_and_caps() {
    let settings = Settings {
        retry_base_delay: 5,
        retry_max_delay: 60,
        ..Settings::default()
    };
    assert_eq!(settings.retry_backoff(1), Duration::from_secs(5));
    assert_eq!(settings.retry_backoff(2), Duration::from_secs(10));
    assert_eq!(settings.retry_backoff(3), Duration::from_secs(20));
    assert_eq!(settings.retry_backoff(4), Duration::from_secs(40));
    assert_eq!(settings.retry_backoff(5), Duration::from_secs(60));
    assert_eq!(settings.retry_backoff(200), Duration::from_secs(60));
}

#[test]
fn test_to_toml_round_trips_through_loader() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tapfarm.toml");
    let original = Settings {
        blacklisted_sessions: vec!["eve".into()],
        sessions_per_proxy: 2,
        ..Settings::default()
    };
    std::fs::write(&path, original.to_toml().unwrap()).unwrap();
    assert_eq!(Settings::load_with_env(Some(&path), no_env).unwrap(), original);
}

#[test]
#[serial_test::serial]
fn test_load_reads_process_environment() {
    // SAFETY: serialized with every other env-mutating test in this crate.
    unsafe { std::env::set_var("CHECK_UPDATE_INTERVAL", "42") };
    let settings = Settings::load(None);
    // SAFETY: see above.
    unsafe { std::env::remove_var("CHECK_UPDATE_INTERVAL") };
    assert_eq!(settings.unwrap().check_update_interval, 42);
}
