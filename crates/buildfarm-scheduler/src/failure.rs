//! Builder failure handling.
//!
//! When a builder misbehaves the scheduler first tries to restart it if it
//! is a virtual machine. Only if that fails, or the builder is a physical
//! machine, is the builder marked failed. Either way any job it held goes
//! back to the queue.

use buildfarm_core::catalog::Catalog;
use buildfarm_core::worker::{WorkerClient, WorkerError};
use buildfarm_core::{BuildState, Builder, Job};
use tracing::{info, warn};

use crate::SchedulerResult;
use crate::pool::BuilderPools;

/// How a builder failure was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureResolution {
    /// The virtual machine restarted; it stays healthy but sits out this cycle.
    Resumed,
    /// The builder was marked failed.
    Failed,
}

/// Put a job back in the queue and its build back to needs-build.
pub async fn requeue(catalog: &dyn Catalog, job: &mut Job) -> SchedulerResult<()> {
    let mut build = catalog.build(job.build).await?;
    build.state = BuildState::NeedsBuild;
    build.builder = None;
    build.started_at = None;
    catalog.update_build(&build).await?;

    job.reset();
    catalog.update_job(job).await?;
    info!(build = %build.id, job = %job.id, "Requeued {}", build.title());
    Ok(())
}

/// Resume-or-fail `builder` after `error`.
pub async fn handle_builder_failure(
    catalog: &dyn Catalog,
    client: &dyn WorkerClient,
    pools: &mut BuilderPools,
    builder: &mut Builder,
    error: &WorkerError,
) -> SchedulerResult<FailureResolution> {
    warn!(builder = %builder.name, error = %error, "Builder failure");

    let resolution = if builder.virtualized {
        match client.resume().await {
            Ok(out) if out.exit_code == 0 => {
                info!(builder = %builder.name, "Resumed virtual builder");
                FailureResolution::Resumed
            }
            Ok(out) => {
                warn!(
                    builder = %builder.name,
                    exit_code = out.exit_code,
                    stderr = %out.stderr.trim(),
                    "Resume failed"
                );
                FailureResolution::Failed
            }
            Err(e) => {
                warn!(builder = %builder.name, error = %e, "Resume failed");
                FailureResolution::Failed
            }
        }
    } else {
        FailureResolution::Failed
    };

    match resolution {
        FailureResolution::Resumed => {
            if !builder.ok {
                builder.recover();
                catalog.update_builder(builder).await?;
            }
            pools.mark_busy(builder.id, None);
            requeue_held(catalog, builder).await?;
        }
        FailureResolution::Failed => fail_builder(catalog, pools, builder, error).await?,
    }

    Ok(resolution)
}

/// Mark `builder` failed without trying to resume it, requeueing any job
/// it held.
pub async fn fail_builder(
    catalog: &dyn Catalog,
    pools: &mut BuilderPools,
    builder: &mut Builder,
    error: &WorkerError,
) -> SchedulerResult<()> {
    builder.fail(error.to_string());
    catalog.update_builder(builder).await?;
    pools.mark_failed(builder.id, error.to_string());
    requeue_held(catalog, builder).await
}

async fn requeue_held(catalog: &dyn Catalog, builder: &Builder) -> SchedulerResult<()> {
    for mut job in catalog.active_jobs().await? {
        if job.builder == Some(builder.id) {
            requeue(catalog, &mut job).await?;
        }
    }
    Ok(())
}
