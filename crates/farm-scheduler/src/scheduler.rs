//! Session scheduler: one worker task per identity.
//!
//! Workers run on a [`JoinSet`]. A panicked worker is respawned (up to
//! `WORKER_RESTART_LIMIT` times); a worker that stops on its own never
//! touches its siblings. The global stop is the only path that ends every
//! session.

use std::collections::{BTreeMap, HashMap};

use farm_core::{Identity, StopReason, StopSignal};
use farm_session::{
    SessionContext, SessionPhase, SessionReport, SessionSnapshot, SessionWorker,
    effective_identity,
};
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const ABORTED_REASON: &str = "aborted after acknowledgment timeout";

struct SessionSlot {
    identity: Identity,
    /// Shared with the running worker. Used to publish the final snapshot
    /// of a worker that was aborted or crashed.
    publisher: watch::Sender<SessionSnapshot>,
    restarts: u32,
}

/// Outcome of a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// One report per started session, ordered by name.
    pub reports: Vec<SessionReport>,
    /// Set when the run ended through the global stop.
    pub stop: Option<StopReason>,
}

impl RunSummary {
    pub fn update_version(&self) -> Option<&str> {
        match &self.stop {
            Some(StopReason::Update { version }) => Some(version),
            _ => None,
        }
    }
}

pub struct Scheduler {
    ctx: SessionContext,
    tasks: JoinSet<SessionReport>,
    running: HashMap<Id, String>,
    sessions: BTreeMap<String, SessionSlot>,
    reports: BTreeMap<String, SessionReport>,
}

impl Scheduler {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            tasks: JoinSet::new(),
            running: HashMap::new(),
            sessions: BTreeMap::new(),
            reports: BTreeMap::new(),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.ctx.stop.clone()
    }

    /// Spawn one worker per non-blacklisted identity. Returns how many
    /// started. Staggering happens inside each worker's start delay.
    pub fn start(&mut self, identities: impl IntoIterator<Item = Identity>) -> usize {
        let mut started = 0;
        for identity in identities {
            if identity.blacklisted || self.ctx.settings.is_blacklisted(&identity.name) {
                info!(session = %identity.name, "skipping blacklisted session");
                continue;
            }
            if self.sessions.contains_key(&identity.name) {
                warn!(session = %identity.name, "session already running");
                continue;
            }
            let identity = effective_identity(identity, &self.ctx.settings);
            let publisher = self.spawn(identity.clone());
            self.sessions.insert(
                identity.name.clone(),
                SessionSlot {
                    identity,
                    publisher,
                    restarts: 0,
                },
            );
            started += 1;
        }
        info!(sessions = started, "sessions started");
        started
    }

    fn spawn(&mut self, identity: Identity) -> watch::Sender<SessionSnapshot> {
        let (publisher, _) = watch::channel(SessionSnapshot::initial(&identity.name));
        let name = identity.name.clone();
        let worker = SessionWorker::new(identity, self.ctx.clone(), publisher.clone());
        let handle = self.tasks.spawn(worker.run());
        self.running.insert(handle.id(), name);
        publisher
    }

    /// Latest published snapshot of every session, ordered by name.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .values()
            .map(|slot| slot.publisher.borrow().clone())
            .collect()
    }

    /// Run until every worker has stopped or the global stop is raised.
    pub async fn await_completion(&mut self) -> RunSummary {
        let stop = self.ctx.stop.clone();
        loop {
            tokio::select! {
                joined = self.tasks.join_next_with_id() => match joined {
                    Some(result) => self.settle(result, true),
                    None => break,
                },
                _ = stop.raised() => {
                    let reason = stop.reason().cloned().unwrap_or(StopReason::Operator);
                    return self.stop_all(reason).await;
                }
            }
        }
        info!("all sessions finished");
        self.summary(None)
    }

    /// Raise the global stop, wait up to `STOP_ACK_TIMEOUT` for workers to
    /// acknowledge, then abort the rest.
    pub async fn stop_all(&mut self, reason: StopReason) -> RunSummary {
        if self.ctx.stop.raise(reason.clone()) {
            info!(reason = %reason, "stopping all sessions");
        }
        let deadline = Instant::now() + self.ctx.settings.stop_ack_timeout();
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(result)) => self.settle(result, false),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        stragglers = self.tasks.len(),
                        timeout_secs = self.ctx.settings.stop_ack_timeout,
                        "sessions did not acknowledge stop; aborting"
                    );
                    self.tasks.abort_all();
                    while let Some(result) = self.tasks.join_next_with_id().await {
                        self.settle(result, false);
                    }
                    break;
                }
            }
        }
        let stop = self.ctx.stop.reason().cloned().unwrap_or(reason);
        self.summary(Some(stop))
    }

    fn settle(&mut self, result: Result<(Id, SessionReport), JoinError>, may_restart: bool) {
        match result {
            Ok((id, report)) => {
                self.running.remove(&id);
                self.reports.insert(report.name.clone(), report);
            }
            Err(err) => {
                let Some(name) = self.running.remove(&err.id()) else {
                    error!(error = %err, "unknown worker task ended");
                    return;
                };
                if err.is_cancelled() {
                    self.record_abnormal(&name, ABORTED_REASON.to_string());
                } else {
                    self.handle_crash(name, err, may_restart);
                }
            }
        }
    }

    fn handle_crash(&mut self, name: String, err: JoinError, may_restart: bool) {
        let limit = self.ctx.settings.worker_restart_limit;
        let restartable = may_restart && !self.ctx.stop.is_raised();
        let identity = match self.sessions.get_mut(&name) {
            Some(slot) if restartable && slot.restarts < limit => {
                slot.restarts += 1;
                warn!(
                    session = %name,
                    error = %err,
                    restart = slot.restarts,
                    limit,
                    "worker crashed; restarting"
                );
                slot.identity.clone()
            }
            _ => {
                error!(session = %name, error = %err, "worker crashed");
                self.record_abnormal(&name, format!("worker crashed: {err}"));
                return;
            }
        };
        let publisher = self.spawn(identity);
        if let Some(slot) = self.sessions.get_mut(&name) {
            slot.publisher = publisher;
        }
    }

    /// Final snapshot and report for a worker that could not report for
    /// itself.
    fn record_abnormal(&mut self, name: &str, reason: String) {
        let cycles = match self.sessions.get(name) {
            Some(slot) => {
                slot.publisher.send_modify(|snap| {
                    snap.phase = SessionPhase::Stopped;
                    snap.taps_remaining = 0;
                    snap.reason = Some(reason.clone());
                });
                slot.publisher.borrow().cycles
            }
            None => 0,
        };
        self.reports.insert(
            name.to_string(),
            SessionReport {
                name: name.to_string(),
                phase: SessionPhase::Stopped,
                reason,
                cycles,
            },
        );
    }

    fn summary(&self, stop: Option<StopReason>) -> RunSummary {
        RunSummary {
            reports: self.reports.values().cloned().collect(),
            stop,
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
