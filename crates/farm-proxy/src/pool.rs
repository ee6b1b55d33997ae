//! Proxy assignment with a per-proxy session limit.
//!
//! Allocating hands out a [`ProxyLease`]: a guard that decrements the
//! proxy's assignment count when released or dropped. If every live proxy
//! is at its limit the caller gets a diagnostic [`PoolStatus`] and decides
//! whether to wait for a release (see [`ProxyPool::releases`]).

use farm_core::Identity;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Health of one proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Healthy,
    /// Failed at least once while replacement is disabled; still handed out.
    Suspect,
    /// Replaced after a failure; never handed out again.
    Dead,
}

/// Allocation rules, taken from `USE_PROXY`, `SESSIONS_PER_PROXY` and
/// `DISABLE_PROXY_REPLACE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    pub enabled: bool,
    pub sessions_per_proxy: u32,
    pub replacement_disabled: bool,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            sessions_per_proxy: 1,
            replacement_disabled: false,
        }
    }
}

#[derive(Debug)]
struct ProxyEntry {
    endpoint: Arc<str>,
    assigned: u32,
    health: ProxyHealth,
    overcommits: u32,
}

/// Non-owning reference to a pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHandle {
    index: usize,
    endpoint: Arc<str>,
}

impl ProxyHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.endpoint)
    }
}

/// A session's binding to a proxy. Releases the assignment on drop.
pub struct ProxyLease {
    pool: Arc<ProxyPool>,
    handle: ProxyHandle,
    released: bool,
}

impl std::fmt::Debug for ProxyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyLease")
            .field("endpoint", &self.handle.endpoint)
            .field("released", &self.released)
            .finish()
    }
}

impl ProxyLease {
    pub fn handle(&self) -> &ProxyHandle {
        &self.handle
    }

    pub fn endpoint(&self) -> &str {
        self.handle.endpoint()
    }

    /// Explicitly give the assignment back.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.pool.release_handle(&self.handle);
        self.released = true;
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Result of asking the pool for a proxy.
#[derive(Debug)]
pub enum Allocation {
    /// Proxies are disabled or none are configured: use the direct path.
    Direct,
    Assigned(ProxyLease),
    /// Every live proxy is at its session limit.
    Exhausted(PoolStatus),
}

impl Allocation {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
}

/// Diagnostic snapshot of one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyStatus {
    pub endpoint: String,
    pub assigned: u32,
    pub health: ProxyHealth,
    /// Assignments granted beyond the limit because replacement is disabled.
    pub overcommits: u32,
}

/// Diagnostic snapshot of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub limit: u32,
    pub proxies: Vec<ProxyStatus>,
}

impl PoolStatus {
    pub fn live(&self) -> usize {
        self.proxies
            .iter()
            .filter(|p| p.health != ProxyHealth::Dead)
            .count()
    }

    /// Free assignment slots across live proxies.
    pub fn free(&self) -> u32 {
        self.proxies
            .iter()
            .filter(|p| p.health != ProxyHealth::Dead)
            .map(|p| self.limit.saturating_sub(p.assigned))
            .sum()
    }
}

#[derive(Debug)]
pub struct ProxyPool {
    policy: PoolPolicy,
    entries: Mutex<Vec<ProxyEntry>>,
    releases: watch::Sender<u64>,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>, policy: PoolPolicy) -> Arc<Self> {
        let entries = endpoints
            .into_iter()
            .map(|endpoint| ProxyEntry {
                endpoint: Arc::from(endpoint),
                assigned: 0,
                health: ProxyHealth::Healthy,
                overcommits: 0,
            })
            .collect();
        let (releases, _) = watch::channel(0);
        Arc::new(Self {
            policy,
            entries: Mutex::new(entries),
            releases,
        })
    }

    /// A pool that always answers `Direct`.
    pub fn disabled() -> Arc<Self> {
        Self::new(
            Vec::new(),
            PoolPolicy {
                enabled: false,
                ..PoolPolicy::default()
            },
        )
    }

    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }

    fn entries(&self) -> MutexGuard<'_, Vec<ProxyEntry>> {
        // Entries stay consistent across a panic: every mutation is a single
        // field write.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `identity` to a proxy.
    ///
    /// Preference: the identity's previously bound proxy if live and below
    /// the limit, then the least-loaded live proxy below the limit (healthy
    /// before suspect). With replacement disabled and every proxy full, the
    /// least-loaded live proxy is reused beyond the limit and the overcommit
    /// is recorded.
    pub fn allocate(self: &Arc<Self>, identity: &Identity) -> Allocation {
        if !self.policy.enabled {
            return Allocation::Direct;
        }
        let mut entries = self.entries();
        if entries.is_empty() {
            return Allocation::Direct;
        }
        let limit = self.policy.sessions_per_proxy;

        let preferred = identity.proxy.as_deref().and_then(|wanted| {
            entries.iter().position(|e| {
                &*e.endpoint == wanted && e.health != ProxyHealth::Dead && e.assigned < limit
            })
        });

        let chosen = preferred.or_else(|| least_loaded(&entries, |e| e.assigned < limit));

        let index = match chosen {
            Some(index) => index,
            None if self.policy.replacement_disabled => {
                let Some(index) = least_loaded(&entries, |_| true) else {
                    return Allocation::Exhausted(snapshot(&entries, limit));
                };
                let entry = &mut entries[index];
                entry.overcommits += 1;
                warn!(
                    session = %identity.name,
                    proxy = %entry.endpoint,
                    assigned = entry.assigned + 1,
                    limit,
                    "all proxies at limit and replacement disabled; reusing proxy beyond limit"
                );
                index
            }
            None => return Allocation::Exhausted(snapshot(&entries, limit)),
        };

        let entry = &mut entries[index];
        entry.assigned += 1;
        debug!(
            session = %identity.name,
            proxy = %entry.endpoint,
            assigned = entry.assigned,
            "proxy assigned"
        );
        let handle = ProxyHandle {
            index,
            endpoint: entry.endpoint.clone(),
        };
        drop(entries);

        Allocation::Assigned(ProxyLease {
            pool: Arc::clone(self),
            handle,
            released: false,
        })
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: ProxyLease) {
        lease.release();
    }

    fn release_handle(&self, handle: &ProxyHandle) {
        {
            let mut entries = self.entries();
            if let Some(entry) = entries.get_mut(handle.index) {
                entry.assigned = entry.assigned.saturating_sub(1);
            }
        }
        self.releases.send_modify(|generation| *generation += 1);
    }

    /// React to a proxy-attributable failure on `lease`.
    ///
    /// Replacement disabled: the proxy is marked suspect and the same lease
    /// comes back. Otherwise the proxy is marked dead, the lease released,
    /// and a fresh allocation is attempted.
    pub fn replace(self: &Arc<Self>, lease: ProxyLease, identity: &Identity) -> Allocation {
        if self.policy.replacement_disabled {
            self.set_health(lease.handle(), ProxyHealth::Suspect);
            warn!(
                session = %identity.name,
                proxy = %lease.endpoint(),
                "proxy failed; replacement disabled, keeping it"
            );
            return Allocation::Assigned(lease);
        }

        self.set_health(lease.handle(), ProxyHealth::Dead);
        let old = lease.endpoint().to_string();
        lease.release();

        let allocation = self.allocate(identity);
        match &allocation {
            Allocation::Assigned(new) => info!(
                session = %identity.name,
                old = %old,
                new = %new.endpoint(),
                "switched to new proxy"
            ),
            Allocation::Exhausted(status) => warn!(
                session = %identity.name,
                old = %old,
                live = status.live(),
                "proxy marked dead; no replacement available"
            ),
            Allocation::Direct => {}
        }
        allocation
    }

    /// Record a successful exchange through `handle`.
    pub fn mark_healthy(&self, handle: &ProxyHandle) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(handle.index) {
            if entry.health == ProxyHealth::Suspect {
                entry.health = ProxyHealth::Healthy;
            }
        }
    }

    fn set_health(&self, handle: &ProxyHandle, health: ProxyHealth) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(handle.index) {
            entry.health = health;
        }
    }

    pub fn status(&self) -> PoolStatus {
        snapshot(&self.entries(), self.policy.sessions_per_proxy)
    }

    /// Receiver that changes every time an assignment is released.
    ///
    /// Subscribe *before* calling [`ProxyPool::allocate`] so a release that
    /// lands between an `Exhausted` answer and the wait is not missed.
    pub fn releases(&self) -> watch::Receiver<u64> {
        self.releases.subscribe()
    }
}

fn least_loaded(entries: &[ProxyEntry], eligible: impl Fn(&ProxyEntry) -> bool) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.health != ProxyHealth::Dead && eligible(e))
        .min_by_key(|(index, e)| (e.assigned, e.health == ProxyHealth::Suspect, *index))
        .map(|(index, _)| index)
}

fn snapshot(entries: &[ProxyEntry], limit: u32) -> PoolStatus {
    PoolStatus {
        limit,
        proxies: entries
            .iter()
            .map(|e| ProxyStatus {
                endpoint: e.endpoint.to_string(),
                assigned: e.assigned,
                health: e.health,
                overcommits: e.overcommits,
            })
            .collect(),
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
