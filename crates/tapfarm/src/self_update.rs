//! GitHub releases as the version source, and `tapfarm check-update`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use farm_config::Settings;
use farm_core::OutputFormat;
use farm_scheduler::VersionSource;
use semver::Version;
use serde::Serialize;
use tokio::process::Command;

const BINARY_NAME: &str = "tapfarm";

/// Releases of `owner/name` on GitHub. Assets are expected as
/// `tapfarm-<target>.tar.gz` containing a `tapfarm` binary.
pub(crate) struct GithubReleases {
    client: reqwest::Client,
    repository: String,
    current: Version,
}

impl GithubReleases {
    pub(crate) fn new(repository: &str) -> Result<Self> {
        let repository = repository.trim();
        if repository.split('/').filter(|s| !s.is_empty()).count() != 2 {
            bail!("UPDATE_REPOSITORY must be 'owner/name', got '{repository}'");
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("tapfarm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        let current = Version::parse(env!("CARGO_PKG_VERSION"))
            .context("Failed to parse own version")?;
        Ok(Self {
            client,
            repository: repository.to_string(),
            current,
        })
    }

    async fn fetch_release(&self, which: &str) -> Result<ReleaseInfo> {
        let url = format!("https://api.github.com/repos/{}/releases/{which}", self.repository);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to fetch release info from {url}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            bail!(
                "No release found. Check https://github.com/{}/releases",
                self.repository
            );
        }
        let response = response
            .error_for_status()
            .context("GitHub API request failed")?;
        response
            .json()
            .await
            .context("Failed to parse release JSON")
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to download {url}"))?
            .bytes()
            .await
            .context("Failed to read download body")?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))
    }
}

#[async_trait]
impl VersionSource for GithubReleases {
    fn current_version(&self) -> Version {
        self.current.clone()
    }

    async fn latest_version(&self) -> Result<Version> {
        let release = self.fetch_release("latest").await?;
        release.version()
    }

    async fn apply_update(&self, version: &Version) -> Result<()> {
        let release = self.fetch_release(&format!("tags/v{version}")).await?;
        let target = get_target_triple()?;
        let asset_name = asset_name(&target);
        let asset = release.find_asset(&asset_name).with_context(|| {
            format!(
                "No binary available for platform '{target}'. Available assets: {:?}",
                release.assets.iter().map(|a| &a.name).collect::<Vec<_>>()
            )
        })?;

        tracing::info!(asset = %asset.name, "downloading update");
        let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;
        let archive_path = temp_dir.path().join(&asset.name);
        self.download(&asset.browser_download_url, &archive_path)
            .await?;
        extract_tarball(&archive_path, temp_dir.path()).await?;

        let extracted = temp_dir.path().join(BINARY_NAME);
        if !extracted.exists() {
            bail!("Binary '{BINARY_NAME}' not found in archive");
        }
        let current_exe =
            std::env::current_exe().context("Failed to get current executable path")?;
        replace_binary(&extracted, &current_exe)
    }
}

fn asset_name(target: &str) -> String {
    format!("{BINARY_NAME}-{target}.tar.gz")
}

async fn extract_tarball(archive: &Path, dest_dir: &Path) -> Result<()> {
    let output = Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(dest_dir)
        .output()
        .await
        .context("Failed to execute tar. Is tar installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Failed to extract archive: {stderr}");
    }
    Ok(())
}

/// Swap `current_binary` for `new_binary`. The running process keeps its
/// mapped image, so this is safe before the restart.
#[cfg(unix)]
fn replace_binary(new_binary: &Path, current_binary: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let backup_path = current_binary.with_extension("old");
    if backup_path.exists() {
        fs::remove_file(&backup_path).ok();
    }
    fs::rename(current_binary, &backup_path).context("Failed to backup current binary")?;
    if let Err(err) = fs::copy(new_binary, current_binary) {
        fs::rename(&backup_path, current_binary).ok();
        return Err(err).context("Failed to copy new binary");
    }
    let mut perms = fs::metadata(current_binary)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(current_binary, perms)?;
    fs::remove_file(&backup_path).ok();
    Ok(())
}

#[cfg(not(unix))]
fn replace_binary(_new_binary: &Path, _current_binary: &Path) -> Result<()> {
    bail!("Self-update is only supported on Unix-like systems");
}

fn get_target_triple() -> Result<String> {
    let arch = std::env::consts::ARCH;
    let os = std::env::consts::OS;

    let target = match (arch, os) {
        ("x86_64", "linux") => "x86_64-unknown-linux-gnu",
        ("aarch64", "linux") => "aarch64-unknown-linux-gnu",
        ("x86_64", "macos") => "x86_64-apple-darwin",
        ("aarch64", "macos") => "aarch64-apple-darwin",
        _ => bail!("Unsupported platform: {arch}-{os}. Install manually from GitHub releases."),
    };
    Ok(target.to_string())
}

#[derive(serde::Deserialize)]
struct ReleaseInfo {
    tag_name: String,
    assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    fn version(&self) -> Result<Version> {
        let tag = self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name);
        Version::parse(tag)
            .with_context(|| format!("Release tag '{}' is not semver", self.tag_name))
    }

    fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

#[derive(serde::Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Serialize)]
struct CheckReport {
    current: String,
    latest: String,
    update_available: bool,
    applied: bool,
}

/// `tapfarm check-update [--apply]`.
pub(crate) async fn handle_check_update(
    settings: &Settings,
    apply: bool,
    format: OutputFormat,
) -> Result<()> {
    if settings.update_repository.trim().is_empty() {
        bail!("UPDATE_REPOSITORY is not set; nothing to check");
    }
    let source = GithubReleases::new(&settings.update_repository)?;
    let current = source.current_version();
    let latest = source.latest_version().await?;
    let update_available = latest > current;

    let mut applied = false;
    if update_available && apply {
        source
            .apply_update(&latest)
            .await
            .with_context(|| format!("Failed to install v{latest}"))?;
        applied = true;
    }

    let report = CheckReport {
        current: current.to_string(),
        latest: latest.to_string(),
        update_available,
        applied,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Current version: v{}", report.current);
            println!("Latest version:  v{}", report.latest);
            if applied {
                println!("Updated to v{}.", report.latest);
            } else if update_available {
                println!("Update available. Run 'tapfarm check-update --apply' to install.");
            } else {
                println!("Already up to date.");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_triple_is_known_or_unsupported() {
        match get_target_triple() {
            Ok(triple) => {
                assert!(triple.contains("linux") || triple.contains("darwin"), "{triple}");
                assert!(triple.contains("x86_64") || triple.contains("aarch64"), "{triple}");
            }
            Err(e) => assert!(e.to_string().contains("Unsupported platform"), "{e}"),
        }
    }

    #[test]
    fn test_release_version_strips_v_prefix() {
        let info: ReleaseInfo =
            serde_json::from_str(r#"{"tag_name": "v1.4.0", "assets": [], "draft": false}"#)
                .unwrap();
        assert_eq!(info.version().unwrap(), Version::new(1, 4, 0));

        let bare: ReleaseInfo =
            serde_json::from_str(r#"{"tag_name": "0.9.2", "assets": []}"#).unwrap();
        assert_eq!(bare.version().unwrap(), Version::new(0, 9, 2));
    }

    #[test]
    fn test_non_semver_tag_is_an_error() {
        let info: ReleaseInfo =
            serde_json::from_str(r#"{"tag_name": "nightly", "assets": []}"#).unwrap();
        let err = info.version().unwrap_err();
        assert!(err.to_string().contains("nightly"));
    }

    #[test]
    fn test_find_asset_for_target() {
        let info: ReleaseInfo = serde_json::from_str(
            r#"{
                "tag_name": "v1.0.0",
                "assets": [
                    {"name": "tapfarm-x86_64-unknown-linux-gnu.tar.gz",
                     "browser_download_url": "https://example.com/linux.tar.gz"},
                    {"name": "tapfarm-aarch64-apple-darwin.tar.gz",
                     "browser_download_url": "https://example.com/mac.tar.gz"}
                ]
            }"#,
        )
        .unwrap();
        let asset = info
            .find_asset(&asset_name("aarch64-apple-darwin"))
            .unwrap();
        assert_eq!(asset.browser_download_url, "https://example.com/mac.tar.gz");
        assert!(info.find_asset(&asset_name("riscv64gc-unknown-linux-gnu")).is_none());
    }

    #[test]
    fn test_repository_must_be_owner_slash_name() {
        assert!(GithubReleases::new("owner/name").is_ok());
        assert!(GithubReleases::new("just-a-name").is_err());
        assert!(GithubReleases::new("a/b/c").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_binary_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("tapfarm");
        let new = dir.path().join("tapfarm-new");
        std::fs::write(&current, b"old").unwrap();
        std::fs::write(&new, b"new").unwrap();

        replace_binary(&new, &current).unwrap();
        assert_eq!(std::fs::read(&current).unwrap(), b"new");
        assert!(!current.with_extension("old").exists());
    }
}
