// End-to-end tests for the tapfarm binary.

use std::path::Path;
use std::process::{Command, Output};

fn tapfarm(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tapfarm"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("USE_PROXY")
        .env_remove("BLACKLISTED_SESSIONS")
        .env_remove("UPDATE_REPOSITORY")
        .args(args)
        .output()
        .expect("failed to run tapfarm")
}

fn write_fixture(dir: &Path) {
    std::fs::write(
        dir.join("accounts.toml"),
        r#"
[[account]]
name = "alice"
credential = "sessions/alice.session"

[[account]]
name = "bob"
credential = "sessions/bob.session"

[[account]]
name = "carol"
credential = "sessions/carol.session"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("proxies.txt"),
        "# pool\nsocks5://10.0.0.1:1080\n\nsocks5://10.0.0.2:1080\n",
    )
    .unwrap();
    std::fs::write(dir.join("tapfarm.toml"), "BLACKLISTED_SESSIONS = [\"bob\"]\n").unwrap();
}

#[test]
fn cli_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = tapfarm(dir.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "sessions", "config", "check-update"] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn run_help_shows_options() {
    let dir = tempfile::tempdir().unwrap();
    let output = tapfarm(dir.path(), &["run", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--log-dir"));
    assert!(stdout.contains("--seed"));
    assert!(stdout.contains("--accounts"));
}

#[test]
fn config_prints_defaults_as_toml() {
    let dir = tempfile::tempdir().unwrap();
    let output = tapfarm(dir.path(), &["config"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SESSION_START_DELAY = 360"));
    assert!(stdout.contains("SLEEP_BETWEEN_TAP = [3, 8]"));
}

#[test]
fn config_applies_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_tapfarm"))
        .current_dir(dir.path())
        .env("MIN_AVAILABLE_ENERGY", "42")
        .args(["--format", "json", "config"])
        .output()
        .unwrap();

    assert!(output.status.success(), "{output:?}");
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["MIN_AVAILABLE_ENERGY"], 42);
}

#[test]
fn invalid_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tapfarm.toml"), "RANDOM_TAPS_COUNT = [100, 35]\n").unwrap();
    let output = tapfarm(dir.path(), &["config"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("RANDOM_TAPS_COUNT"), "{stderr}");
}

#[test]
fn sessions_shows_blacklist_and_proxy_plan() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let output = tapfarm(dir.path(), &["--format", "json", "sessions"]);

    assert!(output.status.success(), "{output:?}");
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["name"], "alice");
    assert_eq!(rows[0]["proxy"], "socks5://10.0.0.1:1080");
    assert_eq!(rows[1]["name"], "bob");
    assert_eq!(rows[1]["blacklisted"], true);
    assert_eq!(rows[2]["proxy"], "socks5://10.0.0.2:1080");
}

#[test]
fn run_without_accounts_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = tapfarm(dir.path(), &["run"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No accounts configured"), "{stderr}");
}

#[test]
fn run_with_every_account_blacklisted_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    std::fs::write(
        dir.path().join("tapfarm.toml"),
        "BLACKLISTED_SESSIONS = [\"alice\", \"bob\", \"carol\"]\n",
    )
    .unwrap();
    let output = tapfarm(dir.path(), &["run"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("No active accounts to run (3 configured, all blacklisted)"),
        "{stderr}"
    );
}

#[test]
fn check_update_requires_repository() {
    let dir = tempfile::tempdir().unwrap();
    let output = tapfarm(dir.path(), &["check-update"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("UPDATE_REPOSITORY is not set"), "{stderr}");
}
