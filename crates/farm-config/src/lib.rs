//! Settings loading (`tapfarm.toml` + environment), the identity store
//! (`accounts.toml`) and the proxy list.

pub mod accounts;
pub mod paths;
pub mod proxies;
pub mod settings;
pub mod validate;

pub use accounts::IdentityStore;
pub use proxies::load_proxies;
pub use settings::Settings;
pub use validate::validate_settings;
