//! In-memory transport and game used by `tapfarm run` and the engine tests.
//!
//! Energy recovers against tokio's clock, so tests on a paused runtime see
//! deterministic recovery. Faults are scripted per account.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use farm_core::{AuthError, GameError, Identity, NetworkError};
use tokio::time::Instant;

use crate::collaborators::{
    AuthHandle, Boost, GameApi, GameStatus, OfflineBonus, Quest, TapOutcome, Transport,
};

const BASE_ENERGY: u64 = 500;
const ENERGY_PER_LEVEL: u64 = 250;
const BASE_PRICE: u64 = 200;
const CHECKIN_REWARD: u64 = 100;
const REFERRAL_BONUS: u64 = 1_000;
const TURBO_TAPS: u64 = 300;

/// Scripted misbehaviour for one account.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Every authentication is rejected as an invalid credential.
    pub permanent_auth: bool,
    /// The first N authentications fail transiently.
    pub transient_auth: u32,
    /// Authentications through these proxies fail with a proxy error.
    pub bad_proxies: Vec<String>,
    /// Direct (proxy-less) authentications fail with a proxy error N times.
    pub proxy_auth: u32,
    /// The account is banned once it has sent this many taps in total.
    pub fatal_after_taps: Option<u64>,
    /// The first N status calls fail retryably.
    pub retryable_status: u32,
    /// The first N status calls are refused as too frequent.
    pub rate_limited_status: u32,
    /// The first N quest completions fail retryably.
    pub retryable_quests: u32,
    /// Every status call takes this long.
    pub status_delay: Option<Duration>,
    /// Every regular tap batch takes this long.
    pub tap_delay: Option<Duration>,
}

/// Initial account values.
#[derive(Debug, Clone)]
pub struct AccountSpec {
    pub energy: u64,
    pub balance: u64,
    pub recovery_per_sec: u64,
    pub turbo_charges: u64,
    /// Amounts of the offline bonuses waiting at first login.
    pub offline_bonuses: Vec<u64>,
    pub quests: Vec<Quest>,
    pub faults: Faults,
}

impl Default for AccountSpec {
    fn default() -> Self {
        Self {
            energy: BASE_ENERGY,
            balance: 0,
            recovery_per_sec: 1,
            turbo_charges: 0,
            offline_bonuses: Vec::new(),
            quests: default_quests(),
            faults: Faults::default(),
        }
    }
}

impl AccountSpec {
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }
}

fn default_quests() -> Vec<Quest> {
    [("join", "Join channel", 500), ("follow", "Follow on X", 300), ("watch", "Watch video", 200)]
        .into_iter()
        .map(|(id, title, reward)| Quest {
            id: id.to_string(),
            title: title.to_string(),
            reward,
            completed: false,
        })
        .collect()
}

/// Counters the tests inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStats {
    pub auth_calls: u32,
    pub tap_batches: Vec<u64>,
    pub quests_completed: u32,
    pub checkins: u32,
    pub upgrades: Vec<Boost>,
    pub referral_claimed: bool,
    pub turbo_batches: Vec<u64>,
    pub offline_claimed: u32,
}

#[derive(Debug)]
struct Account {
    energy: u64,
    recovery_per_sec: u64,
    recovery_at: Instant,
    balance: u64,
    tap_level: u64,
    energy_level: u64,
    charge_level: u64,
    turbo_charges: u64,
    turbo_box: Option<u64>,
    offline_bonuses: Vec<OfflineBonus>,
    quests: Vec<Quest>,
    faults: Faults,
    banned: bool,
    taps_total: u64,
    stats: AccountStats,
}

impl Account {
    fn new(spec: AccountSpec) -> Self {
        let mut account = Self {
            energy: 0,
            recovery_per_sec: spec.recovery_per_sec,
            recovery_at: Instant::now(),
            balance: spec.balance,
            tap_level: 1,
            energy_level: 1,
            charge_level: 1,
            turbo_charges: spec.turbo_charges,
            turbo_box: None,
            offline_bonuses: spec
                .offline_bonuses
                .into_iter()
                .enumerate()
                .map(|(i, amount)| OfflineBonus {
                    id: format!("offline-{i}"),
                    amount,
                    claimable: true,
                })
                .collect(),
            quests: spec.quests,
            faults: spec.faults,
            banned: false,
            taps_total: 0,
            stats: AccountStats::default(),
        };
        account.energy = spec.energy.min(account.max_energy());
        account
    }

    fn max_energy(&self) -> u64 {
        BASE_ENERGY + ENERGY_PER_LEVEL * (self.energy_level - 1)
    }

    fn recover(&mut self) {
        let elapsed = self.recovery_at.elapsed().as_secs();
        if elapsed == 0 {
            return;
        }
        self.energy = self
            .energy
            .saturating_add(elapsed.saturating_mul(self.recovery_per_sec))
            .min(self.max_energy());
        self.recovery_at += Duration::from_secs(elapsed);
    }

    fn price(level: u64) -> u64 {
        BASE_PRICE.saturating_mul(1u64 << level.min(40).saturating_sub(1))
    }

    fn status(&mut self) -> GameStatus {
        self.recover();
        GameStatus {
            energy: self.energy,
            max_energy: self.max_energy(),
            recovery_per_sec: self.recovery_per_sec,
            balance: self.balance,
            tap_level: self.tap_level,
            energy_level: self.energy_level,
            charge_level: self.charge_level,
            tap_price: Self::price(self.tap_level),
            energy_price: Self::price(self.energy_level),
            charge_price: Self::price(self.charge_level),
            turbo_charges: self.turbo_charges,
        }
    }

    fn check_banned(&self) -> Result<(), GameError> {
        if self.banned {
            return Err(GameError::Fatal("account banned".into()));
        }
        Ok(())
    }
}

/// Combined transport + game backend.
#[derive(Debug, Default)]
pub struct SimBackend {
    accounts: Mutex<HashMap<String, Account>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reset) an account. Unknown accounts are created with
    /// [`AccountSpec::default`] on first authentication.
    pub fn insert(&self, name: &str, spec: AccountSpec) {
        self.accounts().insert(name.to_string(), Account::new(spec));
    }

    pub fn stats(&self, name: &str) -> Option<AccountStats> {
        self.accounts().get(name).map(|a| a.stats.clone())
    }

    pub fn status_of(&self, name: &str) -> Option<GameStatus> {
        self.accounts().get_mut(name).map(Account::status)
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_account<T>(
        &self,
        auth: &AuthHandle,
        f: impl FnOnce(&mut Account) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let mut accounts = self.accounts();
        let account = accounts
            .get_mut(&auth.token)
            .ok_or_else(|| GameError::Fatal(format!("unknown session token {}", auth.token)))?;
        if let Some(proxy) = &auth.proxy {
            if account.faults.bad_proxies.contains(proxy) {
                return Err(NetworkError::Proxy(format!("{proxy} refused connection")).into());
            }
        }
        account.check_banned()?;
        f(account)
    }
}

#[async_trait]
impl Transport for SimBackend {
    async fn authenticate(
        &self,
        identity: &Identity,
        proxy: Option<&str>,
    ) -> Result<AuthHandle, AuthError> {
        let mut accounts = self.accounts();
        let account = accounts
            .entry(identity.name.clone())
            .or_insert_with(|| Account::new(AccountSpec::default()));
        account.stats.auth_calls += 1;

        let faults = &mut account.faults;
        if faults.permanent_auth {
            return Err(AuthError::Permanent("session revoked".into()));
        }
        match proxy {
            Some(proxy) if faults.bad_proxies.iter().any(|p| p == proxy) => {
                return Err(NetworkError::Proxy(format!("{proxy} refused connection")).into());
            }
            None if faults.proxy_auth > 0 => {
                faults.proxy_auth -= 1;
                return Err(NetworkError::Proxy("tunnel closed".into()).into());
            }
            _ => {}
        }
        if faults.transient_auth > 0 {
            faults.transient_auth -= 1;
            return Err(AuthError::Transient("flood wait".into()));
        }

        Ok(AuthHandle::new(identity.name.clone(), proxy.map(str::to_string)))
    }
}

#[async_trait]
impl GameApi for SimBackend {
    async fn get_status(&self, auth: &AuthHandle) -> Result<GameStatus, GameError> {
        let delay = self
            .accounts()
            .get(&auth.token)
            .and_then(|a| a.faults.status_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_account(auth, |account| {
            let faults = &mut account.faults;
            if faults.rate_limited_status > 0 {
                faults.rate_limited_status -= 1;
                return Err(GameError::RateLimited("too many requests".into()));
            }
            if faults.retryable_status > 0 {
                faults.retryable_status -= 1;
                return Err(GameError::Retryable("service unavailable".into()));
            }
            Ok(account.status())
        })
    }

    async fn tap(&self, auth: &AuthHandle, count: u64) -> Result<TapOutcome, GameError> {
        let delay = self
            .accounts()
            .get(&auth.token)
            .and_then(|a| a.faults.tap_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_account(auth, |account| {
            account.recover();
            let taps = count.min(account.energy / account.tap_level);
            let taps = match account.faults.fatal_after_taps {
                Some(limit) if account.taps_total + taps >= limit => {
                    account.banned = true;
                    return Err(GameError::Fatal("account banned".into()));
                }
                _ => taps,
            };
            let earned = taps * account.tap_level;
            account.energy -= earned;
            account.balance += earned;
            account.taps_total += taps;
            account.stats.tap_batches.push(taps);
            Ok(TapOutcome {
                taps,
                earned,
                energy: account.energy,
                balance: account.balance,
            })
        })
    }

    async fn list_quests(&self, auth: &AuthHandle) -> Result<Vec<Quest>, GameError> {
        self.with_account(auth, |account| Ok(account.quests.clone()))
    }

    async fn complete_quest(&self, auth: &AuthHandle, id: &str) -> Result<u64, GameError> {
        self.with_account(auth, |account| {
            if account.faults.retryable_quests > 0 {
                account.faults.retryable_quests -= 1;
                return Err(GameError::Retryable("quest service unavailable".into()));
            }
            let quest = account
                .quests
                .iter_mut()
                .find(|q| q.id == id)
                .ok_or_else(|| GameError::Retryable(format!("unknown quest {id}")))?;
            if quest.completed {
                return Ok(0);
            }
            quest.completed = true;
            let reward = quest.reward;
            account.balance += reward;
            account.stats.quests_completed += 1;
            Ok(reward)
        })
    }

    async fn checkin(&self, auth: &AuthHandle) -> Result<u64, GameError> {
        self.with_account(auth, |account| {
            account.balance += CHECKIN_REWARD;
            account.stats.checkins += 1;
            Ok(CHECKIN_REWARD)
        })
    }

    async fn upgrade(&self, auth: &AuthHandle, boost: Boost) -> Result<GameStatus, GameError> {
        self.with_account(auth, |account| {
            account.recover();
            let level = match boost {
                Boost::Tap => account.tap_level,
                Boost::Energy => account.energy_level,
                Boost::Charge => account.charge_level,
            };
            let price = Account::price(level);
            if account.balance < price {
                return Err(GameError::Retryable(format!(
                    "insufficient balance for {boost} level {}",
                    level + 1
                )));
            }
            account.balance -= price;
            match boost {
                Boost::Tap => account.tap_level += 1,
                Boost::Energy => account.energy_level += 1,
                Boost::Charge => {
                    account.charge_level += 1;
                    account.recovery_per_sec += 1;
                }
            }
            account.stats.upgrades.push(boost);
            Ok(account.status())
        })
    }

    async fn claim_referral(&self, auth: &AuthHandle, _ref_id: &str) -> Result<u64, GameError> {
        self.with_account(auth, |account| {
            if account.stats.referral_claimed {
                return Ok(0);
            }
            account.stats.referral_claimed = true;
            account.balance += REFERRAL_BONUS;
            Ok(REFERRAL_BONUS)
        })
    }

    async fn activate_turbo(&self, auth: &AuthHandle) -> Result<u64, GameError> {
        self.with_account(auth, |account| {
            if account.turbo_charges == 0 {
                return Err(GameError::Retryable("no turbo charges left".into()));
            }
            account.turbo_charges -= 1;
            account.turbo_box = Some(TURBO_TAPS);
            Ok(TURBO_TAPS)
        })
    }

    async fn turbo_tap(&self, auth: &AuthHandle, count: u64) -> Result<TapOutcome, GameError> {
        self.with_account(auth, |account| {
            let Some(held) = account.turbo_box.take() else {
                return Err(GameError::Retryable("no active turbo box".into()));
            };
            account.recover();
            let taps = count.min(held);
            let earned = taps * account.tap_level;
            account.balance += earned;
            account.stats.turbo_batches.push(taps);
            Ok(TapOutcome {
                taps,
                earned,
                energy: account.energy,
                balance: account.balance,
            })
        })
    }

    async fn list_offline_bonuses(
        &self,
        auth: &AuthHandle,
    ) -> Result<Vec<OfflineBonus>, GameError> {
        self.with_account(auth, |account| Ok(account.offline_bonuses.clone()))
    }

    async fn claim_offline_bonus(&self, auth: &AuthHandle, id: &str) -> Result<u64, GameError> {
        self.with_account(auth, |account| {
            let bonus = account
                .offline_bonuses
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or_else(|| GameError::Retryable(format!("unknown offline bonus {id}")))?;
            if !bonus.claimable {
                return Ok(0);
            }
            bonus.claimable = false;
            let amount = bonus.amount;
            account.balance += amount;
            account.stats.offline_claimed += 1;
            Ok(amount)
        })
    }
}
