//! Dependency-wait reconciliation.
//!
//! Builds parked in manual-dep-wait are re-checked against the binaries
//! published since they were parked. Only jobs in that state are touched.

use buildfarm_core::{BuildState, ProcessorFamily};
use tracing::{debug, info, warn};

use crate::context::ScanContext;
use crate::dependency::check_dependencies;
use crate::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub examined: usize,
    pub released: usize,
    pub narrowed: usize,
    pub unparsable: usize,
}

/// Re-evaluate the parked jobs of `families`.
pub async fn retry_depwait(
    ctx: &mut ScanContext<'_>,
    families: &[ProcessorFamily],
) -> SchedulerResult<RetryReport> {
    let mut report = RetryReport::default();

    for mut job in ctx
        .catalog
        .candidates(families, BuildState::ManualDepWait)
        .await?
    {
        let mut build = ctx.catalog.build(job.build).await?;
        let archive = ctx.archive(build.archive).await?;
        if !ctx.options.selects(&archive) {
            continue;
        }
        let series = ctx.series(&build.series).await?;
        if !archive.permits_upload(&series, build.pocket) {
            debug!(build = %build.id, "Upload policy closed, leaving parked");
            continue;
        }
        report.examined += 1;

        let expression = job.dependencies.clone().unwrap_or_default();
        let check =
            match check_dependencies(ctx.catalog, &archive, &build.arch_tag, &expression).await {
                Ok(check) => check,
                Err(SchedulerError::Dependency(e)) => {
                    warn!(build = %build.id, error = %e, "Unparsable dependencies, leaving parked");
                    report.unparsable += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

        if check.is_satisfied() {
            build.state = BuildState::NeedsBuild;
            ctx.catalog.update_build(&build).await?;
            job.dependencies = None;
            ctx.catalog.update_job(&job).await?;
            report.released += 1;
            info!(build = %build.id, "Dependencies satisfied, requeueing {}", build.title());
        } else if job.dependencies.as_deref() != Some(check.remaining.as_str()) {
            debug!(build = %build.id, remaining = %check.remaining, "Dependencies narrowed");
            job.dependencies = Some(check.remaining);
            ctx.catalog.update_job(&job).await?;
            report.narrowed += 1;
        }
    }

    ctx.catalog.commit().await?;
    Ok(report)
}
