//! Scheduler: runs one worker per identity, restarts crashed workers,
//! watches for updates and drives the global stop.

pub mod scheduler;
pub mod supervisor;
pub mod update_watch;

#[cfg(test)]
mod test_support;

pub use scheduler::{ABORTED_REASON, RunSummary, Scheduler};
pub use supervisor::{Outcome, supervise};
pub use update_watch::{UpdateCheck, UpdateWatch, VersionSource};
