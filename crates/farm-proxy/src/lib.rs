//! Shared proxy pool: assignment limits, health tracking and replacement.
//!
//! The pool is the only state mutated by several sessions at once. All
//! mutations go through one `std::sync::Mutex` and never hold it across an
//! `.await`.

pub mod pool;

pub use pool::{
    Allocation, PoolPolicy, PoolStatus, ProxyHandle, ProxyHealth, ProxyLease, ProxyPool,
    ProxyStatus,
};
