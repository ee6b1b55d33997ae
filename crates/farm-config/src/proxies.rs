use anyhow::{Context, Result};
use std::path::Path;

/// Read a proxy list: one connection string per line, blank lines and
/// `#` comments skipped, duplicates dropped (first occurrence kept).
pub fn load_proxies(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proxies: {}", path.display()))?;
    Ok(parse_proxies(&content))
}

pub fn parse_proxies(content: &str) -> Vec<String> {
    let mut proxies: Vec<String> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !proxies.iter().any(|p| p == line) {
            proxies.push(line.to_string());
        }
    }
    proxies
}
