use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Opaque credential material (session string, session file path, token).
///
/// The engine never inspects it; `Debug` is redacted so identities can be
/// logged freely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(material: impl Into<String>) -> Self {
        Self(material.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One configured game account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique reference name (session name).
    pub name: String,
    pub credential: Credential,
    /// Referral id used on first login; falls back to the global `REF_ID`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    /// Send randomized device parameters to the transport.
    #[serde(default)]
    pub device_params: bool,
    /// Proxy this account was bound to previously. Preferred on allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub blacklisted: bool,
}

impl Identity {
    pub fn new(name: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: Credential::new(credential),
            ref_id: None,
            device_params: false,
            proxy: None,
            blacklisted: false,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Inclusive `[lo, hi]` range, written as a two-element array in config
/// (`SLEEP_BETWEEN_TAP = [3, 8]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct IntRange {
    pub lo: u64,
    pub hi: u64,
}

impl IntRange {
    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: u64) -> bool {
        (self.lo..=self.hi).contains(&value)
    }

    pub fn is_ordered(&self) -> bool {
        self.lo <= self.hi
    }
}

impl From<[u64; 2]> for IntRange {
    fn from([lo, hi]: [u64; 2]) -> Self {
        Self { lo, hi }
    }
}

impl From<IntRange> for [u64; 2] {
    fn from(range: IntRange) -> Self {
        [range.lo, range.hi]
    }
}

impl std::fmt::Display for IntRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Output format for CLI responses
#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let identity = Identity::new("alice", "1BVtsOK8Bu-secret");
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("secret"));
        assert_eq!(identity.credential.expose(), "1BVtsOK8Bu-secret");
    }

    #[test]
    fn test_identity_deserialize_defaults() {
        let identity: Identity =
            serde_json::from_str(r#"{"name": "bob", "credential": "sessions/bob.session"}"#)
                .unwrap();
        assert_eq!(identity.name, "bob");
        assert!(!identity.blacklisted);
        assert!(!identity.device_params);
        assert!(identity.proxy.is_none());
    }

    #[test]
    fn test_int_range_from_array() {
        let range: IntRange = serde_json::from_str("[35, 100]").unwrap();
        assert_eq!(range, IntRange::new(35, 100));
        assert!(range.contains(35));
        assert!(range.contains(100));
        assert!(!range.contains(101));
        assert_eq!(serde_json::to_string(&range).unwrap(), "[35,100]");
    }

    #[test]
    fn test_int_range_ordering() {
        assert!(IntRange::new(3, 8).is_ordered());
        assert!(IntRange::new(5, 5).is_ordered());
        assert!(!IntRange::new(8, 3).is_ordered());
    }
}
