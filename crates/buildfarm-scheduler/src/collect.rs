//! Pool refresh and result collection.
//!
//! Every cycle starts by asking each builder for its status. Idle builders
//! become available, running builds get their log tail recorded, and
//! finished builds have their outcome written back before the builder is
//! cleaned.

use buildfarm_core::worker::{BuildOutcome, BuilderStatus, FileMap, WorkerClient, WorkerError};
use buildfarm_core::{BuildState, Builder, BuilderId, Job};
use futures::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::context::ScanContext;
use crate::failure::{FailureResolution, handle_builder_failure, requeue};
use crate::pool::{BuilderPools, SlotState};
use crate::{SchedulerError, SchedulerResult};

/// Counters from one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub probed: usize,
    pub idle: usize,
    pub building: usize,
    pub collected: usize,
    pub recovered: usize,
    pub failed: usize,
}

fn rpc_error(builder: &Builder, source: WorkerError) -> SchedulerError {
    SchedulerError::Worker {
        builder: builder.name.clone(),
        source,
    }
}

/// Probe all builders and rebuild the pools.
///
/// Manual builders are probed so their finished builds are collected, but
/// the pools never offer them work. Failed builders are only probed in
/// careful mode, and are marked ok again if they answer.
pub async fn refresh_pools(ctx: &ScanContext<'_>) -> SchedulerResult<(BuilderPools, RefreshReport)> {
    let mut pools = BuilderPools::new();
    let mut report = RefreshReport::default();

    let mut to_probe = Vec::new();
    for builder in ctx.catalog.builders().await? {
        pools.add_family(&builder.family);
        if !builder.ok && !ctx.options.careful {
            let note = builder.failure_note.clone().unwrap_or_default();
            pools.insert(builder, SlotState::Failed(note));
            continue;
        }
        to_probe.push(builder);
    }

    let probes = join_all(to_probe.into_iter().map(|builder| {
        let client = ctx.connector.connect(&builder);
        async move {
            let status = client.status().await;
            (builder, client, status)
        }
    }))
    .await;
    report.probed = probes.len();

    let mut held: HashMap<BuilderId, Job> = ctx
        .catalog
        .active_jobs()
        .await?
        .into_iter()
        .filter_map(|job| job.builder.map(|b| (b, job)))
        .collect();

    for (mut builder, client, status) in probes {
        let job = held.remove(&builder.id);
        let result = match status {
            Ok(status) => {
                if !builder.ok {
                    info!(builder = %builder.name, "Builder answered again, marking ok");
                    builder.recover();
                    ctx.catalog.update_builder(&builder).await?;
                    report.recovered += 1;
                }
                collect(ctx, &mut pools, &builder, client.as_ref(), status, job, &mut report).await
            }
            Err(_) if !builder.ok => {
                debug!(builder = %builder.name, "Failed builder still unreachable");
                let note = builder.failure_note.clone().unwrap_or_default();
                pools.insert(builder, SlotState::Failed(note));
                continue;
            }
            Err(e) => Err(rpc_error(&builder, e)),
        };

        match result {
            Ok(()) => {}
            Err(SchedulerError::Worker { source, .. }) => {
                pools.insert(builder.clone(), SlotState::Busy(None));
                let resolution = handle_builder_failure(
                    ctx.catalog,
                    client.as_ref(),
                    &mut pools,
                    &mut builder,
                    &source,
                )
                .await?;
                if resolution == FailureResolution::Failed {
                    report.failed += 1;
                }
            }
            Err(e) => return Err(e),
        }
    }

    ctx.catalog.commit().await?;
    info!(
        probed = report.probed,
        idle = report.idle,
        building = report.building,
        collected = report.collected,
        failed = report.failed,
        "Refreshed builder pools"
    );
    Ok((pools, report))
}

async fn collect(
    ctx: &ScanContext<'_>,
    pools: &mut BuilderPools,
    builder: &Builder,
    client: &dyn WorkerClient,
    status: BuilderStatus,
    held: Option<Job>,
    report: &mut RefreshReport,
) -> SchedulerResult<()> {
    match status {
        BuilderStatus::Idle => {
            if let Some(mut job) = held {
                warn!(builder = %builder.name, job = %job.id, "Idle builder lost its build");
                requeue(ctx.catalog, &mut job).await?;
            }
            pools.insert(builder.clone(), SlotState::Idle);
            report.idle += 1;
        }
        BuilderStatus::Building { cookie, logtail } => match held {
            Some(mut job) if job.cookie().to_string() == cookie => {
                job.logtail = Some(logtail);
                ctx.catalog.update_job(&job).await?;
                pools.insert(builder.clone(), SlotState::Busy(Some(job.id)));
                report.building += 1;
            }
            held => {
                warn!(builder = %builder.name, cookie = %cookie, "Builder is running an unknown build, aborting");
                pools.insert(builder.clone(), SlotState::Busy(None));
                client.abort().await.map_err(|e| rpc_error(builder, e))?;
                if let Some(mut job) = held {
                    requeue(ctx.catalog, &mut job).await?;
                }
            }
        },
        BuilderStatus::Waiting {
            cookie,
            outcome,
            filemap,
            dependencies,
        } => {
            pools.insert(builder.clone(), SlotState::Busy(None));
            match held {
                Some(job) if job.cookie().to_string() == cookie => {
                    apply_outcome(ctx, job, outcome, &filemap, dependencies).await?;
                    report.collected += 1;
                    if outcome == BuildOutcome::BuilderFailure {
                        return Err(rpc_error(
                            builder,
                            WorkerError::Protocol("builder reported a builder failure".to_string()),
                        ));
                    }
                }
                held => {
                    warn!(builder = %builder.name, cookie = %cookie, "Builder finished an unknown build");
                    if let Some(mut job) = held {
                        requeue(ctx.catalog, &mut job).await?;
                    }
                }
            }
            client.clean().await.map_err(|e| rpc_error(builder, e))?;
        }
    }
    Ok(())
}

/// Write a finished build's outcome back to the catalog.
async fn apply_outcome(
    ctx: &ScanContext<'_>,
    mut job: Job,
    outcome: BuildOutcome,
    filemap: &FileMap,
    dependencies: Option<String>,
) -> SchedulerResult<()> {
    let catalog = ctx.catalog;
    let mut build = catalog.build(job.build).await?;
    info!(build = %build.id, outcome = %outcome, files = filemap.len(), "Collected {}", build.title());

    let terminal = match outcome {
        BuildOutcome::Ok => Some(BuildState::Uploading),
        BuildOutcome::PackageFailure => Some(BuildState::FailedToBuild),
        BuildOutcome::ChrootFailure => Some(BuildState::ChrootWait),
        BuildOutcome::DependencyFailure => {
            build.state = BuildState::ManualDepWait;
            catalog.update_build(&build).await?;
            job.reset();
            job.dependencies = dependencies;
            catalog.update_job(&job).await?;
            None
        }
        BuildOutcome::BuilderFailure => {
            requeue(catalog, &mut job).await?;
            None
        }
    };

    if let Some(state) = terminal {
        build.finish(state, ctx.now);
        catalog.update_build(&build).await?;
        catalog.destroy_job(job.id).await?;
    }
    Ok(())
}
