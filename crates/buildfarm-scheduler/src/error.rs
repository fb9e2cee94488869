//! Scheduler error types.

use buildfarm_core::worker::WorkerError;
use thiserror::Error;

use crate::dependency::DependencyError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("catalog error: {0}")]
    Catalog(#[from] buildfarm_core::Error),

    #[error("builder {builder}: {source}")]
    Worker {
        builder: String,
        #[source]
        source: WorkerError,
    },

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
