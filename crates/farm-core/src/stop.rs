//! Global stop signal shared by the scheduler, every worker and the update watch.
//!
//! The first caller of [`StopSignal::raise`] decides the recorded reason;
//! later raises leave the recorded reason untouched.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why the whole farm is stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A newer version was found and auto-update is enabled.
    Update { version: String },
    /// Ctrl-C or an explicit operator request.
    Operator,
    /// Every session reached `Stopped` on its own.
    Drained,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update { version } => write!(f, "update to v{version}"),
            Self::Operator => write!(f, "operator request"),
            Self::Drained => write!(f, "all sessions finished"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the stop. Returns `false` if it was already raised.
    pub fn raise(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&StopReason> {
        self.reason.get()
    }

    /// Resolves once the stop is raised. Cancel-safe; use inside `select!`.
    pub fn raised(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
        assert!(stop.raise(StopReason::Update {
            version: "1.4.0".into()
        }));
        assert!(!stop.raise(StopReason::Operator));
        assert!(stop.is_raised());
        assert_eq!(
            stop.reason(),
            Some(&StopReason::Update {
                version: "1.4.0".into()
            })
        );
    }

    #[test]
    fn test_clones_share_state() {
        let stop = StopSignal::new();
        let observer = stop.clone();
        stop.raise(StopReason::Operator);
        assert!(observer.is_raised());
        assert_eq!(observer.reason(), Some(&StopReason::Operator));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            StopReason::Update {
                version: "2.0.1".into()
            }
            .to_string(),
            "update to v2.0.1"
        );
        assert_eq!(StopReason::Operator.to_string(), "operator request");
    }

    #[tokio::test]
    async fn test_raised_future_resolves() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let handle = tokio::spawn(async move {
            waiter.raised().await;
            waiter.reason().cloned()
        });
        stop.raise(StopReason::Operator);
        assert_eq!(handle.await.unwrap(), Some(StopReason::Operator));
    }
}
