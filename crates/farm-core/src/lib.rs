//! Shared types for the tapfarm workspace: identities, the error taxonomy
//! every session failure is classified into, and the global stop signal.

pub mod error;
pub mod stop;
pub mod types;

pub use error::{AuthError, FarmError, GameError, NetworkError};
pub use stop::{StopReason, StopSignal};
pub use types::{Credential, Identity, IntRange, OutputFormat};
