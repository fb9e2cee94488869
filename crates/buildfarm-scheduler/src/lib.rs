//! Build scheduling and dispatch for the buildfarm.
//!
//! One scan cycle refreshes the builder pools (collecting finished builds on
//! the way), queues jobs for new builds, re-checks jobs waiting on build
//! dependencies, then scores and dispatches each processor family's queue.

pub mod collect;
pub mod context;
pub mod dependency;
pub mod dispatch;
pub mod error;
pub mod failure;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod scorer;

#[cfg(test)]
pub(crate) mod testing;

pub use collect::RefreshReport;
pub use context::ScanOptions;
pub use dependency::{DependencyCheck, DependencyError};
pub use dispatch::FamilyReport;
pub use error::{SchedulerError, SchedulerResult};
pub use orchestrator::{CycleReport, Orchestrator};
pub use pool::{BuilderPool, BuilderPools, SlotState};
pub use retry::RetryReport;
