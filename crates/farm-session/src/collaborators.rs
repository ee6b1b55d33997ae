//! Boundary traits for the messaging transport and the game API.
//!
//! The engine only talks to these traits. [`crate::sim`] provides an
//! in-memory implementation of both.

use async_trait::async_trait;
use farm_core::{AuthError, GameError, Identity};
use serde::{Deserialize, Serialize};

/// Result of a successful authentication. Game calls go through the same
/// egress path the handle was issued on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHandle {
    pub token: String,
    pub proxy: Option<String>,
}

impl AuthHandle {
    pub fn new(token: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            token: token.into(),
            proxy,
        }
    }
}

/// Authoritative account status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatus {
    pub energy: u64,
    pub max_energy: u64,
    /// Energy regained per second.
    pub recovery_per_sec: u64,
    pub balance: u64,
    pub tap_level: u64,
    pub energy_level: u64,
    pub charge_level: u64,
    pub tap_price: u64,
    pub energy_price: u64,
    pub charge_price: u64,
    /// Turbo activations left today.
    #[serde(default)]
    pub turbo_charges: u64,
}

impl GameStatus {
    pub fn level(&self, boost: Boost) -> u64 {
        match boost {
            Boost::Tap => self.tap_level,
            Boost::Energy => self.energy_level,
            Boost::Charge => self.charge_level,
        }
    }

    /// Price of the next level of `boost`.
    pub fn price(&self, boost: Boost) -> u64 {
        match boost {
            Boost::Tap => self.tap_price,
            Boost::Energy => self.energy_price,
            Boost::Charge => self.charge_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapOutcome {
    pub taps: u64,
    pub earned: u64,
    /// Energy left after the batch.
    pub energy: u64,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub title: String,
    pub reward: u64,
    pub completed: bool,
}

/// Coins accrued while the account was offline, waiting to be collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineBonus {
    pub id: String,
    pub amount: u64,
    pub claimable: bool,
}

/// Upgradable account boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boost {
    /// Coins (and energy) per tap.
    Tap,
    /// Energy capacity.
    Energy,
    /// Energy recovery rate.
    Charge,
}

impl Boost {
    /// Upgrade order when several are affordable.
    pub const ALL: [Boost; 3] = [Boost::Tap, Boost::Energy, Boost::Charge];
}

impl std::fmt::Display for Boost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boost::Tap => write!(f, "tap"),
            Boost::Energy => write!(f, "energy"),
            Boost::Charge => write!(f, "charge"),
        }
    }
}

/// Messaging-platform authentication.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn authenticate(
        &self,
        identity: &Identity,
        proxy: Option<&str>,
    ) -> Result<AuthHandle, AuthError>;
}

/// Game actions available to an authenticated session.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn get_status(&self, auth: &AuthHandle) -> Result<GameStatus, GameError>;

    /// Send a batch of `count` taps.
    async fn tap(&self, auth: &AuthHandle, count: u64) -> Result<TapOutcome, GameError>;

    async fn list_quests(&self, auth: &AuthHandle) -> Result<Vec<Quest>, GameError>;

    /// Complete a quest and return its reward.
    async fn complete_quest(&self, auth: &AuthHandle, id: &str) -> Result<u64, GameError>;

    /// Daily check-in. Returns the reward.
    async fn checkin(&self, auth: &AuthHandle) -> Result<u64, GameError>;

    /// Buy the next level of `boost` and return the updated status.
    async fn upgrade(&self, auth: &AuthHandle, boost: Boost) -> Result<GameStatus, GameError>;

    /// Redeem a referral code on first login. Returns the bonus.
    async fn claim_referral(&self, auth: &AuthHandle, ref_id: &str) -> Result<u64, GameError>;

    /// Spend one turbo charge. Returns how many taps the turbo box holds.
    async fn activate_turbo(&self, auth: &AuthHandle) -> Result<u64, GameError>;

    /// Collect an active turbo box. Turbo taps cost no energy.
    async fn turbo_tap(&self, auth: &AuthHandle, count: u64) -> Result<TapOutcome, GameError>;

    async fn list_offline_bonuses(
        &self,
        auth: &AuthHandle,
    ) -> Result<Vec<OfflineBonus>, GameError>;

    /// Collect one offline bonus and return the amount credited.
    async fn claim_offline_bonus(&self, auth: &AuthHandle, id: &str) -> Result<u64, GameError>;
}
