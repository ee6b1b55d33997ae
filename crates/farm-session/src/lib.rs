//! Per-account session state machine and its collaborator boundary.

pub mod collaborators;
pub mod sim;
pub mod state;
pub mod worker;

pub use collaborators::{
    AuthHandle, Boost, GameApi, GameStatus, OfflineBonus, Quest, TapOutcome, Transport,
};
pub use state::{Gauge, PhaseEvent, SessionPhase, SessionReport, SessionSnapshot, SessionState};
pub use worker::{SessionContext, SessionWorker};

use farm_config::Settings;
use farm_core::Identity;
use farm_proxy::PoolPolicy;

/// Pool rules from `USE_PROXY`, `SESSIONS_PER_PROXY` and `DISABLE_PROXY_REPLACE`.
pub fn pool_policy(settings: &Settings) -> PoolPolicy {
    PoolPolicy {
        enabled: settings.use_proxy,
        sessions_per_proxy: settings.sessions_per_proxy,
        replacement_disabled: settings.disable_proxy_replace,
    }
}

/// Fill per-identity overrides from the global `REF_ID` and `DEVICE_PARAMS`.
pub fn effective_identity(mut identity: Identity, settings: &Settings) -> Identity {
    if identity.ref_id.as_deref().is_none_or(str::is_empty) && !settings.ref_id.is_empty() {
        identity.ref_id = Some(settings.ref_id.clone());
    }
    identity.device_params |= settings.device_params;
    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_policy_from_settings() {
        let settings = Settings {
            use_proxy: false,
            sessions_per_proxy: 4,
            disable_proxy_replace: true,
            ..Settings::default()
        };
        let policy = pool_policy(&settings);
        assert!(!policy.enabled);
        assert_eq!(policy.sessions_per_proxy, 4);
        assert!(policy.replacement_disabled);
    }

    #[test]
    fn test_effective_identity_prefers_own_ref_id() {
        let settings = Settings {
            ref_id: "global".into(),
            device_params: true,
            ..Settings::default()
        };
        let plain = effective_identity(Identity::new("a", "x"), &settings);
        assert_eq!(plain.ref_id.as_deref(), Some("global"));
        assert!(plain.device_params);

        let mut own = Identity::new("b", "x");
        own.ref_id = Some("mine".into());
        let own = effective_identity(own, &settings);
        assert_eq!(own.ref_id.as_deref(), Some("mine"));
    }
}
