use anyhow::Result;
use farm_config::{IdentityStore, Settings};
use farm_core::OutputFormat;
use farm_proxy::{Allocation, ProxyPool};
use farm_session::{effective_identity, pool_policy};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct SessionRow {
    pub name: String,
    pub blacklisted: bool,
    /// `None` for blacklisted accounts and direct connections.
    pub proxy: Option<String>,
    pub pool_exhausted: bool,
}

/// Dry-run allocation in name order, as `tapfarm run` would start them.
pub(crate) fn plan_sessions(
    store: &IdentityStore,
    proxies: Vec<String>,
    settings: &Settings,
) -> Vec<SessionRow> {
    let pool = ProxyPool::new(proxies, pool_policy(settings));
    let mut held = Vec::new();
    let mut rows = Vec::with_capacity(store.len());
    for identity in store.all() {
        let mut row = SessionRow {
            name: identity.name.clone(),
            blacklisted: identity.blacklisted,
            proxy: None,
            pool_exhausted: false,
        };
        if !identity.blacklisted {
            let identity = effective_identity(identity.clone(), settings);
            match pool.allocate(&identity) {
                Allocation::Direct => {}
                Allocation::Assigned(lease) => {
                    row.proxy = Some(lease.endpoint().to_string());
                    held.push(lease);
                }
                Allocation::Exhausted(_) => row.pool_exhausted = true,
            }
        }
        rows.push(row);
    }
    rows
}

/// `tapfarm sessions`.
pub(crate) fn handle_sessions(
    store: &IdentityStore,
    proxies: Vec<String>,
    settings: &Settings,
    format: OutputFormat,
) -> Result<()> {
    let rows = plan_sessions(store, proxies, settings);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            println!("{:<24} {:<12} PROXY", "NAME", "STATUS");
            for row in &rows {
                let status = if row.blacklisted { "blacklisted" } else { "active" };
                let proxy = match (&row.proxy, row.pool_exhausted) {
                    (Some(endpoint), _) => endpoint.as_str(),
                    (None, true) => "(waits for a free proxy)",
                    (None, false) if row.blacklisted => "-",
                    (None, false) => "(direct)",
                };
                println!("{:<24} {:<12} {}", row.name, status, proxy);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::Identity;

    fn store() -> IdentityStore {
        IdentityStore::new(
            vec![
                Identity::new("alice", "a"),
                Identity::new("bob", "b"),
                Identity::new("carol", "c"),
                Identity::new("dave", "d"),
            ],
            &["bob".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_plan_spreads_over_proxies_and_skips_blacklisted() {
        let settings = Settings::default();
        let rows = plan_sessions(
            &store(),
            vec!["socks5://p1:1".into(), "socks5://p2:1".into()],
            &settings,
        );
        let by_name = |n: &str| rows.iter().find(|r| r.name == n).unwrap();

        assert!(by_name("bob").blacklisted);
        assert_eq!(by_name("bob").proxy, None);
        assert_eq!(by_name("alice").proxy.as_deref(), Some("socks5://p1:1"));
        assert_eq!(by_name("carol").proxy.as_deref(), Some("socks5://p2:1"));
        // One session per proxy and replacement allowed: dave must wait.
        assert!(by_name("dave").pool_exhausted);
    }

    #[test]
    fn test_plan_without_proxies_is_direct() {
        let settings = Settings {
            use_proxy: false,
            ..Settings::default()
        };
        let rows = plan_sessions(&store(), vec!["socks5://p1:1".into()], &settings);
        assert!(rows.iter().all(|r| r.proxy.is_none() && !r.pool_exhausted));
    }
}
