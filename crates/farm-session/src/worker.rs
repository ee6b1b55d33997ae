//! Account session worker: one state machine per identity.
//!
//! The worker owns its [`SessionState`] and proxy lease. Other tasks only
//! see the snapshots it publishes after every transition. The global stop
//! is checked before each transition and between the steps of a cycle, and
//! interrupts every sleep, but never an in-flight call (those are bounded by
//! `CALL_TIMEOUT`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use farm_config::Settings;
use farm_core::{FarmError, GameError, Identity, IntRange, NetworkError, StopSignal};
use farm_proxy::{Allocation, ProxyLease, ProxyPool};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::collaborators::{AuthHandle, Boost, GameApi, GameStatus, Transport};
use crate::state::{PhaseEvent, SessionPhase, SessionReport, SessionSnapshot, SessionState};

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: Arc<Settings>,
    pub pool: Arc<ProxyPool>,
    pub transport: Arc<dyn Transport>,
    pub game: Arc<dyn GameApi>,
    pub stop: StopSignal,
    /// Fixed RNG seed (per-session streams are derived from it).
    pub seed: Option<u64>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("pool", &self.pool.status())
            .field("stop", &self.stop.is_raised())
            .field("seed", &self.seed)
            .finish()
    }
}

/// What the current phase decided.
enum Step {
    Next(PhaseEvent),
    Fail(FarmError),
    Stop(String),
}

pub struct SessionWorker {
    identity: Identity,
    ctx: SessionContext,
    state: SessionState,
    rng: StdRng,
    publisher: watch::Sender<SessionSnapshot>,
    lease: Option<ProxyLease>,
    auth: Option<(AuthHandle, Instant)>,
    last_status: Option<GameStatus>,
    last_refresh: Option<Instant>,
    last_checkin_at: Option<Instant>,
    pending_failure: Option<FarmError>,
    cycle_failures: u32,
    referral_claimed: bool,
    rate_limited: bool,
}

impl SessionWorker {
    pub fn new(
        identity: Identity,
        ctx: SessionContext,
        publisher: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let rng = match ctx.seed {
            Some(seed) => StdRng::seed_from_u64(session_seed(seed, &identity.name)),
            None => StdRng::from_os_rng(),
        };
        let settings = &ctx.settings;
        let state = SessionState::new(
            settings.max_tap_level,
            settings.max_energy_level,
            settings.max_charge_level,
        );
        Self {
            identity,
            ctx,
            state,
            rng,
            publisher,
            lease: None,
            auth: None,
            last_status: None,
            last_refresh: None,
            last_checkin_at: None,
            pending_failure: None,
            cycle_failures: 0,
            referral_claimed: false,
            rate_limited: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Drive the state machine to `Stopped` and return the final report.
    pub async fn run(self) -> SessionReport {
        let span = info_span!("session", name = %self.identity.name);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> SessionReport {
        self.publish();
        let reason = loop {
            if self.ctx.stop.is_raised() {
                break self.global_stop_reason();
            }

            let step = match self.state.phase {
                SessionPhase::Starting => self.start_delay().await,
                SessionPhase::Authenticating => self.authenticate().await,
                SessionPhase::Active => self.cycle().await,
                SessionPhase::Sleeping => self.sleep().await,
                SessionPhase::Failing => self.fail().await,
                SessionPhase::Stopped => break "stopped".to_string(),
            };

            let event = match step {
                Step::Next(event) => event,
                Step::Fail(err) => {
                    self.pending_failure = Some(err);
                    PhaseEvent::Failed
                }
                Step::Stop(reason) => break reason,
            };

            let from = self.state.phase;
            if let Err(err) = self.state.apply_phase_event(event) {
                break err;
            }
            debug!(from = %from, to = %self.state.phase, "phase transition");
            self.publish();
        };
        self.finish(reason)
    }

    async fn start_delay(&mut self) -> Step {
        let hi = self.ctx.settings.session_start_delay;
        let delay = draw(&mut self.rng, IntRange::new(hi.min(1), hi));
        info!(delay_secs = delay, "starting");
        if self.pause(Duration::from_secs(delay)).await {
            Step::Next(PhaseEvent::Delayed)
        } else {
            Step::Stop(self.global_stop_reason())
        }
    }

    async fn authenticate(&mut self) -> Step {
        if self.lease.is_none() {
            if let Some(step) = self.acquire_proxy().await {
                return step;
            }
        }

        let proxy = self.lease.as_ref().map(|l| l.endpoint().to_string());
        let settings = Arc::clone(&self.ctx.settings);
        let result = bounded(
            &settings,
            self.ctx
                .transport
                .authenticate(&self.identity, proxy.as_deref()),
        )
        .await;

        match result {
            Ok(handle) => {
                if let Some(lease) = &self.lease {
                    self.ctx.pool.mark_healthy(lease.handle());
                }
                info!(proxy = proxy.as_deref().unwrap_or("direct"), "authenticated");
                self.auth = Some((handle, Instant::now()));
                self.claim_referral().await;
                self.collect_offline_bonuses().await;
                Step::Next(PhaseEvent::Authenticated)
            }
            Err(err) if err.is_permanent() => Step::Stop(err.to_string()),
            Err(err) => Step::Fail(err.into()),
        }
    }

    /// Bind a proxy, waiting for releases while the pool is exhausted.
    /// Returns a step only when the global stop interrupts the wait.
    async fn acquire_proxy(&mut self) -> Option<Step> {
        loop {
            let mut releases = self.ctx.pool.releases();
            match self.ctx.pool.allocate(&self.identity) {
                Allocation::Direct => {
                    self.state.proxy = None;
                    return None;
                }
                Allocation::Assigned(lease) => {
                    self.state.proxy = Some(lease.endpoint().to_string());
                    self.lease = Some(lease);
                    return None;
                }
                Allocation::Exhausted(status) => {
                    let err = FarmError::PoolExhausted {
                        proxies: status.live(),
                        limit: status.limit,
                    };
                    warn!(
                        error = %err,
                        wait_secs = self.ctx.settings.proxy_wait,
                        "waiting for a proxy"
                    );
                    self.state.proxy = None;
                    self.publish();
                    let wait = self.ctx.settings.proxy_wait();
                    tokio::select! {
                        _ = tokio::time::timeout(wait, releases.changed()) => {}
                        _ = self.ctx.stop.raised() => {
                            return Some(Step::Stop(self.global_stop_reason()));
                        }
                    }
                }
            }
        }
    }

    async fn claim_referral(&mut self) {
        if self.referral_claimed {
            return;
        }
        self.referral_claimed = true;
        let Some(ref_id) = self.identity.ref_id.clone().filter(|r| !r.is_empty()) else {
            return;
        };
        let Some(auth) = self.auth_handle() else {
            return;
        };
        let settings = Arc::clone(&self.ctx.settings);
        match bounded(&settings, self.ctx.game.claim_referral(&auth, &ref_id)).await {
            Ok(bonus) => {
                self.state.balance = self.state.balance.saturating_add(bonus);
                info!(ref_id = %ref_id, bonus, "referral code activated");
            }
            Err(err) => warn!(ref_id = %ref_id, error = %err, "referral activation failed"),
        }
    }

    /// Collect every claimable offline bonus. Failures are logged only.
    async fn collect_offline_bonuses(&mut self) {
        let Some(auth) = self.auth_handle() else {
            return;
        };
        let settings = Arc::clone(&self.ctx.settings);
        let game = Arc::clone(&self.ctx.game);
        let bonuses = match bounded(&settings, game.list_offline_bonuses(&auth)).await {
            Ok(bonuses) => bonuses,
            Err(err) => {
                warn!(error = %err, "offline bonus lookup failed");
                return;
            }
        };
        for bonus in bonuses.into_iter().filter(|b| b.claimable) {
            if self.ctx.stop.is_raised() {
                return;
            }
            match bounded(&settings, game.claim_offline_bonus(&auth, &bonus.id)).await {
                Ok(amount) => {
                    self.state.balance = self.state.balance.saturating_add(amount);
                    info!(bonus = %bonus.id, amount, "offline bonus collected");
                }
                Err(err) => warn!(bonus = %bonus.id, error = %err, "offline bonus claim failed"),
            }
        }
    }

    async fn cycle(&mut self) -> Step {
        let token_fresh = self
            .auth
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() < self.ctx.settings.auth_ttl());
        let Some(auth) = self.auth_handle().filter(|_| token_fresh) else {
            debug!("auth token expired");
            return Step::Next(PhaseEvent::TokenExpired);
        };

        self.cycle_failures = 0;
        match self.cycle_inner(&auth).await {
            Ok(()) => {
                self.state.consecutive_failures = 0;
                self.state.cycles += 1;
                self.state.last_activity = Some(Utc::now());
                info!(
                    cycle = self.state.cycles,
                    energy = %self.state.energy,
                    balance = self.state.balance,
                    "cycle complete"
                );
                Step::Next(PhaseEvent::CycleDone)
            }
            Err(step) => step,
        }
    }

    /// Energy refresh, taps, quests, check-in, then upgrades when drained.
    async fn cycle_inner(&mut self, auth: &AuthHandle) -> Result<(), Step> {
        let settings = Arc::clone(&self.ctx.settings);
        let game = Arc::clone(&self.ctx.game);

        match self.settle("get_status", bounded(&settings, game.get_status(auth)).await)? {
            Some(status) => {
                if let Some(lease) = &self.lease {
                    self.ctx.pool.mark_healthy(lease.handle());
                }
                self.apply_status(status);
            }
            None => self.estimate_recovery(),
        }

        self.check_stop()?;
        if self.state.energy.value() >= settings.min_available_energy {
            let turbo_ready = self.last_status.as_ref().is_some_and(|s| s.turbo_charges > 0);
            let turbo_done = turbo_ready && self.turbo(auth).await?;
            if !turbo_done {
                self.check_stop()?;
                self.tap(auth).await?;
            }
        } else {
            debug!(
                energy = self.state.energy.value(),
                min = settings.min_available_energy,
                "energy below minimum; skipping taps"
            );
        }

        self.check_stop()?;
        if let Some(quests) =
            self.settle("list_quests", bounded(&settings, game.list_quests(auth)).await)?
        {
            for quest in quests.into_iter().filter(|q| !q.completed) {
                self.check_stop()?;
                let result = bounded(&settings, game.complete_quest(auth, &quest.id)).await;
                if let Some(reward) = self.settle("complete_quest", result)? {
                    self.state.balance = self.state.balance.saturating_add(reward);
                    info!(quest = %quest.title, reward, "quest completed");
                }
            }
        }

        let checkin_due = self
            .last_checkin_at
            .is_none_or(|at| at.elapsed() >= settings.checkin_interval());
        if checkin_due {
            self.check_stop()?;
            let result = bounded(&settings, game.checkin(auth)).await;
            if let Some(reward) = self.settle("checkin", result)? {
                self.last_checkin_at = Some(Instant::now());
                self.state.last_checkin = Some(Utc::now());
                self.state.balance = self.state.balance.saturating_add(reward);
                info!(reward, "checked in");
            }
        }

        if self.state.energy.value() < settings.min_available_energy {
            self.upgrade_boosts(auth).await?;
        }
        Ok(())
    }

    /// Send one regular batch drawn from `RANDOM_TAPS_COUNT`.
    async fn tap(&mut self, auth: &AuthHandle) -> Result<(), Step> {
        let settings = Arc::clone(&self.ctx.settings);
        let drawn = draw(&mut self.rng, settings.random_taps_count);
        let count = drawn.min(self.state.affordable_taps());
        if count == 0 {
            return Ok(());
        }
        self.state.taps_remaining = count;
        self.publish();
        let result = bounded(&settings, self.ctx.game.tap(auth, count)).await;
        self.state.taps_remaining = 0;
        if let Some(outcome) = self.settle("tap", result)? {
            self.state.energy.set(outcome.energy);
            self.state.balance = outcome.balance;
            info!(
                taps = outcome.taps,
                earned = outcome.earned,
                energy = %self.state.energy,
                balance = outcome.balance,
                "tapped"
            );
        }
        Ok(())
    }

    /// Spend a turbo charge and collect its box. Returns `false` when the
    /// activation failed and regular taps should run instead.
    async fn turbo(&mut self, auth: &AuthHandle) -> Result<bool, Step> {
        let settings = Arc::clone(&self.ctx.settings);
        let game = Arc::clone(&self.ctx.game);
        let result = bounded(&settings, game.activate_turbo(auth)).await;
        let Some(taps) = self.settle("activate_turbo", result)? else {
            return Ok(false);
        };
        if let Some(status) = &mut self.last_status {
            status.turbo_charges = status.turbo_charges.saturating_sub(1);
        }
        info!(taps, "turbo activated");

        self.check_stop()?;
        self.state.taps_remaining = taps;
        self.publish();
        let result = bounded(&settings, game.turbo_tap(auth, taps)).await;
        self.state.taps_remaining = 0;
        if let Some(outcome) = self.settle("turbo_tap", result)? {
            self.state.energy.set(outcome.energy);
            self.state.balance = outcome.balance;
            info!(
                taps = outcome.taps,
                earned = outcome.earned,
                balance = outcome.balance,
                "turbo tapped"
            );
        }
        Ok(true)
    }

    async fn upgrade_boosts(&mut self, auth: &AuthHandle) -> Result<(), Step> {
        let settings = Arc::clone(&self.ctx.settings);
        let game = Arc::clone(&self.ctx.game);
        for boost in Boost::ALL {
            let Some(status) = &self.last_status else {
                return Ok(());
            };
            let next = status.level(boost) + 1;
            let price = status.price(boost);
            let cap = match boost {
                Boost::Tap => settings.max_tap_level,
                Boost::Energy => settings.max_energy_level,
                Boost::Charge => settings.max_charge_level,
            };
            if next > cap || self.state.balance < price {
                continue;
            }
            self.check_stop()?;
            info!(boost = %boost, level = next, price, max = cap, "upgrading");
            let result = bounded(&settings, game.upgrade(auth, boost)).await;
            if let Some(status) = self.settle("upgrade", result)? {
                self.apply_status(status);
            }
        }
        Ok(())
    }

    async fn sleep(&mut self) -> Step {
        let settings = Arc::clone(&self.ctx.settings);
        let energy = self.state.energy.value();
        let secs = if std::mem::take(&mut self.rate_limited) {
            let secs = draw(&mut self.rng, settings.sleep_by_min_energy);
            info!(sleep_secs = secs, "rate limited; sleeping");
            secs
        } else if energy >= settings.min_available_energy {
            draw(&mut self.rng, settings.sleep_between_tap)
        } else {
            let drawn = draw(&mut self.rng, settings.sleep_by_min_energy);
            let capped = match recovery_secs(
                energy,
                settings.min_available_energy,
                self.state.recovery_per_sec,
            ) {
                Some(needed) if settings.cap_sleep_by_recovery => drawn.min(needed),
                _ => drawn,
            };
            let secs = capped.max(settings.sleep_between_tap.lo);
            info!(
                energy,
                balance = self.state.balance,
                sleep_secs = secs,
                "energy is out; sleeping"
            );
            secs
        };

        if self.pause(Duration::from_secs(secs)).await {
            Step::Next(PhaseEvent::Woke)
        } else {
            Step::Stop(self.global_stop_reason())
        }
    }

    async fn fail(&mut self) -> Step {
        let err = self.pending_failure.take();
        self.state.consecutive_failures += 1;
        let attempt = self.state.consecutive_failures;
        self.auth = None;

        let cause = err
            .as_ref()
            .map_or_else(|| "unknown failure".to_string(), ToString::to_string);

        if err.as_ref().is_some_and(FarmError::is_proxy_attributable) {
            if let Some(lease) = self.lease.take() {
                match self.ctx.pool.replace(lease, &self.identity) {
                    Allocation::Assigned(lease) => {
                        self.state.proxy = Some(lease.endpoint().to_string());
                        self.lease = Some(lease);
                    }
                    Allocation::Direct | Allocation::Exhausted(_) => self.state.proxy = None,
                }
            }
        }

        let max_retries = self.ctx.settings.max_retries;
        if attempt > max_retries {
            return Step::Stop(format!("max retries exceeded: {cause}"));
        }

        let backoff = self.ctx.settings.retry_backoff(attempt);
        warn!(
            attempt,
            max_retries,
            backoff_secs = backoff.as_secs(),
            error = %cause,
            "session failing; backing off"
        );
        self.publish();
        if self.pause(backoff).await {
            Step::Next(PhaseEvent::BackedOff)
        } else {
            Step::Stop(self.global_stop_reason())
        }
    }

    fn finish(mut self, reason: String) -> SessionReport {
        if !self.state.phase.is_terminal() {
            self.state.phase = SessionPhase::Stopped;
        }
        self.state.taps_remaining = 0;
        self.state.reason = Some(reason.clone());
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.publish();

        if self.ctx.stop.is_raised() {
            info!(reason = %reason, cycles = self.state.cycles, "session stopped");
        } else {
            warn!(reason = %reason, cycles = self.state.cycles, "session stopped");
        }

        SessionReport {
            name: self.identity.name.clone(),
            phase: self.state.phase,
            reason,
            cycles: self.state.cycles,
        }
    }

    /// Route a failed game action. Returns `Err(step)` when the cycle ends.
    fn settle<T>(
        &mut self,
        action: &'static str,
        result: Result<T, GameError>,
    ) -> Result<Option<T>, Step> {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err,
        };
        if err.is_session_fatal() {
            return Err(Step::Stop(err.to_string()));
        }
        if err.is_proxy_attributable() {
            return Err(Step::Fail(err.into()));
        }
        if err.is_rate_limited() {
            info!(action, error = %err, "throttled by the game");
            self.rate_limited = true;
            return Err(Step::Next(PhaseEvent::RateLimited));
        }
        self.cycle_failures += 1;
        let budget = self.ctx.settings.action_failure_budget;
        warn!(action, error = %err, spent = self.cycle_failures, budget, "action failed");
        if self.cycle_failures >= budget {
            return Err(Step::Fail(err.into()));
        }
        Ok(None)
    }

    fn apply_status(&mut self, status: GameStatus) {
        let state = &mut self.state;
        state.energy.set_max(status.max_energy);
        state.energy.set(status.energy);
        state.tap_level.set(status.tap_level);
        state.energy_level.set(status.energy_level);
        state.charge_level.set(status.charge_level);
        state.recovery_per_sec = status.recovery_per_sec;
        state.balance = status.balance;
        self.last_status = Some(status);
        self.last_refresh = Some(Instant::now());
    }

    /// Fallback when the status call failed: credit recovery since the last
    /// authoritative refresh.
    fn estimate_recovery(&mut self) {
        let Some(at) = self.last_refresh else {
            return;
        };
        let now = Instant::now();
        let elapsed = now.duration_since(at).as_secs();
        let gained = elapsed.saturating_mul(self.state.recovery_per_sec);
        self.state.energy.add(gained);
        self.last_refresh = Some(now);
        debug!(gained, energy = %self.state.energy, "estimated energy recovery");
    }

    /// Ends the cycle early once the global stop is raised.
    fn check_stop(&self) -> Result<(), Step> {
        if self.ctx.stop.is_raised() {
            return Err(Step::Stop(self.global_stop_reason()));
        }
        Ok(())
    }

    fn auth_handle(&self) -> Option<AuthHandle> {
        self.auth.as_ref().map(|(handle, _)| handle.clone())
    }

    /// Sleep unless the global stop arrives first. Returns `false` if stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.ctx.stop.raised() => false,
        }
    }

    fn global_stop_reason(&self) -> String {
        match self.ctx.stop.reason() {
            Some(reason) => format!("global stop: {reason}"),
            None => "global stop".to_string(),
        }
    }

    fn publish(&self) {
        self.publisher
            .send_replace(self.state.snapshot(&self.identity.name));
    }
}

/// Await `fut` for at most `CALL_TIMEOUT`.
async fn bounded<T, E>(
    settings: &Settings,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<NetworkError>,
{
    match tokio::time::timeout(settings.call_timeout(), fut).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout {
            secs: settings.call_timeout,
        }
        .into()),
    }
}

fn draw(rng: &mut StdRng, range: IntRange) -> u64 {
    if range.lo >= range.hi {
        range.lo
    } else {
        rng.random_range(range.lo..=range.hi)
    }
}

/// Seconds needed to climb from `energy` back to `min` at `rate` per second.
pub(crate) fn recovery_secs(energy: u64, min: u64, rate: u64) -> Option<u64> {
    if rate == 0 {
        return None;
    }
    Some(min.saturating_sub(energy).div_ceil(rate))
}

fn session_seed(seed: u64, name: &str) -> u64 {
    name.bytes().fold(seed, |acc, b| {
        acc.wrapping_mul(0x100_0000_01b3).wrapping_add(u64::from(b))
    })
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
