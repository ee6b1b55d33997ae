/// Failure of the network path a session talks through.
///
/// `Proxy` marks failures attributable to the bound egress proxy (connect
/// refused by the proxy, tunnel errors, proxy auth); the worker answers them
/// by asking the pool for a replacement.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("proxy failure: {0}")]
    Proxy(String),

    #[error("network failure: {0}")]
    Other(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl NetworkError {
    pub fn is_proxy_attributable(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }
}

/// Outcome of a failed `Transport::authenticate`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Invalid or revoked credential. The session never retries.
    #[error("invalid credential: {0}")]
    Permanent(String),

    #[error("authentication failed: {0}")]
    Transient(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl AuthError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub fn is_proxy_attributable(&self) -> bool {
        matches!(self, Self::Network(net) if net.is_proxy_attributable())
    }
}

/// Failure of a single game API action.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// 5xx or malformed payloads. Spends the cycle failure budget.
    #[error("retryable game error: {0}")]
    Retryable(String),

    /// The game refused the request as too frequent. Ends the cycle and
    /// sends the session into a long sleep without counting a failure.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Ban, revoked auth, account closed. Stops the owning session.
    #[error("session-fatal game error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl GameError {
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_proxy_attributable(&self) -> bool {
        matches!(self, Self::Network(net) if net.is_proxy_attributable())
    }
}

/// Engine-level error surfaced by workers, the pool and the scheduler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FarmError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("no proxy available: all {proxies} proxies hold {limit} session(s) each")]
    PoolExhausted { proxies: usize, limit: u32 },

    #[error("global stop: {0}")]
    GlobalStop(crate::StopReason),
}

impl FarmError {
    /// True when the failure should be answered by replacing the proxy.
    pub fn is_proxy_attributable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_proxy_attributable(),
            Self::Network(e) => e.is_proxy_attributable(),
            Self::Game(e) => e.is_proxy_attributable(),
            Self::PoolExhausted { .. } | Self::GlobalStop(_) => false,
        }
    }

    /// True when the owning session must stop without retrying.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_permanent(),
            Self::Game(e) => e.is_session_fatal(),
            Self::GlobalStop(_) => true,
            Self::Network(_) | Self::PoolExhausted { .. } => false,
        }
    }
}
