//! Session state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events that trigger session phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Start-up delay elapsed.
    Delayed,
    /// Transport accepted the credential.
    Authenticated,
    /// One tap/quest/check-in cycle completed.
    CycleDone,
    /// The game throttled the session mid-cycle.
    RateLimited,
    /// Pacing sleep elapsed.
    Woke,
    /// Auth token reached `AUTH_TTL`.
    TokenExpired,
    /// A failure that goes through retry handling.
    Failed,
    /// Backoff elapsed; authenticate again.
    BackedOff,
    /// Terminal stop (permanent error, retries exhausted, global stop).
    Stop,
}

/// Worker lifecycle phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Starting,
    Authenticating,
    Active,
    Sleeping,
    Failing,
    Stopped,
}

impl SessionPhase {
    /// Attempt a phase transition driven by `event`.
    ///
    /// ```text
    ///   Starting       --Delayed-------> Authenticating
    ///   Authenticating --Authenticated-> Active
    ///   Active         --CycleDone-----> Sleeping
    ///   Active         --RateLimited---> Sleeping
    ///   Sleeping       --Woke----------> Active
    ///   Active|Sleeping --TokenExpired-> Authenticating
    ///   Authenticating|Active|Sleeping --Failed--> Failing
    ///   Failing        --BackedOff-----> Authenticating
    ///   any non-terminal --Stop--------> Stopped
    /// ```
    pub fn transition(&self, event: &PhaseEvent) -> Result<SessionPhase, String> {
        use PhaseEvent as E;
        use SessionPhase as P;
        match (self, event) {
            (P::Stopped, event) => Err(format!(
                "invalid phase transition: {:?} + {:?}",
                P::Stopped,
                event
            )),
            (_, E::Stop) => Ok(P::Stopped),
            (P::Starting, E::Delayed) => Ok(P::Authenticating),
            (P::Authenticating, E::Authenticated) => Ok(P::Active),
            (P::Active, E::CycleDone | E::RateLimited) => Ok(P::Sleeping),
            (P::Sleeping, E::Woke) => Ok(P::Active),
            (P::Active | P::Sleeping, E::TokenExpired) => Ok(P::Authenticating),
            (P::Authenticating | P::Active | P::Sleeping, E::Failed) => Ok(P::Failing),
            (P::Failing, E::BackedOff) => Ok(P::Authenticating),
            (current, event) => Err(format!(
                "invalid phase transition: {:?} + {:?}",
                current, event
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Stopped)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Starting => write!(f, "starting"),
            SessionPhase::Authenticating => write!(f, "authenticating"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Sleeping => write!(f, "sleeping"),
            SessionPhase::Failing => write!(f, "failing"),
            SessionPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Integer bounded to `[0, max]`. Every update clamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauge {
    value: u64,
    max: u64,
}

impl Gauge {
    pub fn new(value: u64, max: u64) -> Self {
        Self {
            value: value.min(max),
            max,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn set(&mut self, value: u64) {
        self.value = value.min(self.max);
    }

    pub fn add(&mut self, delta: u64) {
        self.set(self.value.saturating_add(delta));
    }

    pub fn sub(&mut self, delta: u64) {
        self.value = self.value.saturating_sub(delta);
    }

    /// Change the ceiling; the current value is clamped to it.
    pub fn set_max(&mut self, max: u64) {
        self.max = max;
        self.value = self.value.min(max);
    }

    pub fn is_full(&self) -> bool {
        self.value == self.max
    }
}

impl std::fmt::Display for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.value, self.max)
    }
}

/// Mutable state of one running session. Owned by its worker.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub energy: Gauge,
    pub tap_level: Gauge,
    pub energy_level: Gauge,
    pub charge_level: Gauge,
    /// Energy regained per second, as last reported by the game.
    pub recovery_per_sec: u64,
    /// Taps in the batch currently in flight.
    pub taps_remaining: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub proxy: Option<String>,
    pub cycles: u64,
    pub last_checkin: Option<DateTime<Utc>>,
    pub balance: u64,
    /// Why the session stopped, once it has.
    pub reason: Option<String>,
}

impl SessionState {
    /// Fresh state with level ceilings from `MAX_TAP_LEVEL`,
    /// `MAX_ENERGY_LEVEL` and `MAX_CHARGE_LEVEL`.
    pub fn new(max_tap_level: u64, max_energy_level: u64, max_charge_level: u64) -> Self {
        Self {
            tap_level: Gauge::new(0, max_tap_level),
            energy_level: Gauge::new(0, max_energy_level),
            charge_level: Gauge::new(0, max_charge_level),
            ..Self::default()
        }
    }

    /// Apply a lifecycle event and update `phase` in-place.
    pub fn apply_phase_event(&mut self, event: PhaseEvent) -> Result<(), String> {
        let new_phase = self.phase.transition(&event)?;
        self.phase = new_phase;
        Ok(())
    }

    /// Taps the current energy pays for at the current tap level.
    pub fn affordable_taps(&self) -> u64 {
        self.energy.value() / self.tap_level.value().max(1)
    }

    pub fn snapshot(&self, name: &str) -> SessionSnapshot {
        SessionSnapshot {
            name: name.to_string(),
            phase: self.phase,
            energy: self.energy.value(),
            max_energy: self.energy.max(),
            tap_level: self.tap_level.value(),
            energy_level: self.energy_level.value(),
            charge_level: self.charge_level.value(),
            taps_remaining: self.taps_remaining,
            balance: self.balance,
            cycles: self.cycles,
            consecutive_failures: self.consecutive_failures,
            proxy: self.proxy.clone(),
            last_activity: self.last_activity,
            last_checkin: self.last_checkin,
            reason: self.reason.clone(),
        }
    }
}

/// Read-only view of a session, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub phase: SessionPhase,
    pub energy: u64,
    pub max_energy: u64,
    pub tap_level: u64,
    pub energy_level: u64,
    pub charge_level: u64,
    #[serde(default)]
    pub taps_remaining: u64,
    pub balance: u64,
    pub cycles: u64,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkin: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SessionSnapshot {
    /// Placeholder published before a worker has run.
    pub fn initial(name: &str) -> Self {
        SessionState::default().snapshot(name)
    }
}

/// Final outcome of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub name: String,
    pub phase: SessionPhase,
    pub reason: String,
    pub cycles: u64,
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}: {} ({} cycles)",
            self.name, self.phase, self.reason, self.cycles
        )
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
