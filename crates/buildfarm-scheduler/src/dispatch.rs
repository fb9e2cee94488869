//! Per-family dispatch.
//!
//! For one processor family: prune unbuildable and superseded jobs, score
//! what is left, then hand jobs to idle builders in score order until either
//! runs out.

use buildfarm_core::catalog::Chroot;
use buildfarm_core::worker::{BuildArgs, FileMap, PROTOCOL_VERSION, WorkerClient, WorkerError};
use buildfarm_core::{
    Archive, Build, BuildState, Builder, Job, Pocket, ProcessorFamily, Series,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::context::ScanContext;
use crate::dependency::check_dependencies;
use crate::failure::{FailureResolution, fail_builder, handle_builder_failure};
use crate::pool::BuilderPools;
use crate::scorer;
use crate::{SchedulerError, SchedulerResult};

/// Counters from dispatching one family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyReport {
    pub family: String,
    pub candidates: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub superseded: usize,
    pub failed_to_build: usize,
    pub builder_failures: usize,
}

/// A job with everything needed to dispatch it.
#[derive(Debug, Clone)]
struct Candidate {
    job: Job,
    build: Build,
    archive: Archive,
}

/// Result of trying to start a job on one builder.
enum Attempt {
    Started,
    /// Wrong protocol or architecture; try another builder.
    Mismatch(String),
    /// A file could not be placed on the builder; give up on the job for now.
    Aborted(String),
    Failed(WorkerError),
    /// The virtual machine would not restart; resuming again is pointless.
    ResumeFailed(WorkerError),
}

/// Everything a builder needs to start one job.
struct BuildRequest {
    chroot: Chroot,
    distro: String,
    filemap: FileMap,
    args: BuildArgs,
    credentials: Option<(String, String)>,
}

/// Dispatch the queued jobs of `family`.
pub async fn dispatch_family(
    ctx: &mut ScanContext<'_>,
    pools: &mut BuilderPools,
    family: &ProcessorFamily,
) -> SchedulerResult<FamilyReport> {
    let mut report = FamilyReport {
        family: family.to_string(),
        ..Default::default()
    };

    let mut candidates = gather(ctx, family, &mut report).await?;
    ctx.catalog.commit().await?;

    for candidate in &mut candidates {
        let delta = dependency_delta(ctx, candidate).await?;
        let previous = candidate.job.score;
        let score = scorer::rescore(
            &mut candidate.job,
            &candidate.build,
            &candidate.archive,
            delta,
            ctx.now,
        );
        if score != previous {
            ctx.catalog.update_job(&candidate.job).await?;
        }
    }
    ctx.catalog.commit().await?;

    candidates.sort_by(|a, b| {
        b.job
            .score
            .cmp(&a.job.score)
            .then(a.build.id.cmp(&b.build.id))
    });
    report.candidates = candidates.len();

    for candidate in candidates {
        if pools.check_available(family).is_empty() {
            debug!(family = %family, "No idle builders left");
            break;
        }
        dispatch_one(ctx, pools, candidate, &mut report).await?;
    }

    info!(
        family = %family,
        candidates = report.candidates,
        dispatched = report.dispatched,
        skipped = report.skipped,
        superseded = report.superseded,
        "Dispatched family"
    );
    Ok(report)
}

/// Load the family's needs-build jobs, retiring those that can never build.
async fn gather(
    ctx: &mut ScanContext<'_>,
    family: &ProcessorFamily,
    report: &mut FamilyReport,
) -> SchedulerResult<Vec<Candidate>> {
    let jobs = ctx
        .catalog
        .candidates(std::slice::from_ref(family), BuildState::NeedsBuild)
        .await?;

    let mut candidates = Vec::with_capacity(jobs.len());
    for job in jobs {
        let mut build = ctx.catalog.build(job.build).await?;
        let archive = ctx.archive(build.archive).await?;
        if !ctx.options.selects(&archive) {
            continue;
        }

        if build.files.is_empty() {
            info!(build = %build.id, "No source files, superseding {}", build.title());
            retire(ctx, &mut build, &job, BuildState::Superseded).await?;
            report.superseded += 1;
            continue;
        }

        let superseded = ctx
            .catalog
            .current_publication(&build)
            .await?
            .map(|p| p.supersedes(&build))
            .unwrap_or(false);
        if superseded {
            info!(build = %build.id, "Source superseded, dropping {}", build.title());
            retire(ctx, &mut build, &job, BuildState::Superseded).await?;
            report.superseded += 1;
            continue;
        }

        if build.pocket == Pocket::Security {
            info!(build = %build.id, "Security builds are not automated, failing {}", build.title());
            retire(ctx, &mut build, &job, BuildState::FailedToBuild).await?;
            report.failed_to_build += 1;
            continue;
        }

        candidates.push(Candidate {
            job,
            build,
            archive,
        });
    }
    Ok(candidates)
}

async fn retire(
    ctx: &ScanContext<'_>,
    build: &mut Build,
    job: &Job,
    state: BuildState,
) -> SchedulerResult<()> {
    build.finish(state, ctx.now);
    ctx.catalog.update_build(build).await?;
    ctx.catalog.destroy_job(job.id).await?;
    Ok(())
}

/// Dependency score for a job. Unparsable expressions count for nothing.
async fn dependency_delta(ctx: &ScanContext<'_>, candidate: &Candidate) -> SchedulerResult<i64> {
    let Some(expression) = candidate.job.dependencies.as_deref() else {
        return Ok(0);
    };
    match check_dependencies(
        ctx.catalog,
        &candidate.archive,
        &candidate.build.arch_tag,
        expression,
    )
    .await
    {
        Ok(check) => Ok(check.score_delta),
        Err(SchedulerError::Dependency(e)) => {
            warn!(job = %candidate.job.id, error = %e, "Ignoring dependencies for scoring");
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

async fn dispatch_one(
    ctx: &mut ScanContext<'_>,
    pools: &mut BuilderPools,
    mut candidate: Candidate,
    report: &mut FamilyReport,
) -> SchedulerResult<()> {
    let Some(request) = prepare(ctx, &candidate).await? else {
        report.skipped += 1;
        return Ok(());
    };

    let family = candidate.job.family.clone();
    let builders = pools.available(&family, candidate.job.virtualized);
    if builders.is_empty() {
        debug!(
            build = %candidate.build.id,
            virtualized = candidate.job.virtualized,
            "No matching builder for {}",
            candidate.build.title()
        );
        report.skipped += 1;
        return Ok(());
    }

    for mut builder in builders {
        let client = ctx.connector.connect(&builder);
        match start(client.as_ref(), &builder, &candidate, &request).await {
            Attempt::Started => {
                mark_started(ctx, pools, &mut candidate, &mut builder).await?;
                report.dispatched += 1;
                return Ok(());
            }
            Attempt::Mismatch(reason) => {
                warn!(builder = %builder.name, build = %candidate.build.id, "Skipping builder: {}", reason);
            }
            Attempt::Aborted(reason) => {
                warn!(builder = %builder.name, build = %candidate.build.id, "Dispatch aborted: {}", reason);
                report.skipped += 1;
                return Ok(());
            }
            Attempt::Failed(error) => {
                let resolution = handle_builder_failure(
                    ctx.catalog,
                    client.as_ref(),
                    pools,
                    &mut builder,
                    &error,
                )
                .await?;
                if resolution == FailureResolution::Failed {
                    report.builder_failures += 1;
                }
                ctx.catalog.commit().await?;
                return Ok(());
            }
            Attempt::ResumeFailed(error) => {
                warn!(builder = %builder.name, error = %error, "Builder failure");
                fail_builder(ctx.catalog, pools, &mut builder, &error).await?;
                report.builder_failures += 1;
                ctx.catalog.commit().await?;
                return Ok(());
            }
        }
    }

    report.skipped += 1;
    Ok(())
}

/// Check a job's pre-conditions and assemble its build request.
///
/// `None` means the job cannot go out this cycle; nothing is changed.
async fn prepare(
    ctx: &mut ScanContext<'_>,
    candidate: &Candidate,
) -> SchedulerResult<Option<BuildRequest>> {
    let build = &candidate.build;
    let archive = &candidate.archive;

    let Some(chroot) = ctx
        .catalog
        .chroot(&build.arch_tag, &build.series, build.pocket)
        .await?
    else {
        warn!(build = %build.id, "No chroot for {} {} {}", build.arch_tag, build.series, build.pocket);
        return Ok(None);
    };

    let series = ctx.series(&build.series).await?;
    if !archive.permits_upload(&series, build.pocket) {
        warn!(build = %build.id, archive = %archive.name, "Upload policy forbids {}", series.suite(build.pocket));
        return Ok(None);
    }

    if archive.require_virtualized && !candidate.job.virtualized {
        warn!(build = %build.id, archive = %archive.name, "Archive requires a virtualized builder");
        return Ok(None);
    }

    if archive.private {
        let published = ctx
            .catalog
            .current_publication(build)
            .await?
            .map(|p| p.is_visible())
            .unwrap_or(false);
        if !published {
            debug!(build = %build.id, "Private source not yet published");
            return Ok(None);
        }
    }

    let mut sources = Vec::new();
    for id in archive.search_path() {
        let dependency = ctx.archive(id).await?;
        sources.push(source_line(ctx, &dependency, &series, build.pocket));
    }

    let credentials = match (&ctx.config.archive_auth, archive.private) {
        (Some(auth), true) => Some((auth.user.clone(), auth.password.clone())),
        _ => None,
    };

    Ok(Some(BuildRequest {
        distro: series.distribution.clone(),
        filemap: build
            .files
            .iter()
            .map(|f| (f.name.clone(), f.sha1.clone()))
            .collect(),
        args: BuildArgs {
            arch_indep: build.arch_indep,
            suite: series.suite(build.pocket),
            ogrecomponent: build.component.to_string(),
            archive_purpose: archive.purpose.to_string(),
            archives: sources,
            archive_private: archive.private,
        },
        chroot,
        credentials,
    }))
}

/// An apt source line for `archive`, with credentials for private archives.
fn source_line(ctx: &ScanContext<'_>, archive: &Archive, series: &Series, pocket: Pocket) -> String {
    let mut url = ctx
        .config
        .archive_root
        .join(&format!("{}/", archive.name))
        .unwrap_or_else(|_| ctx.config.archive_root.clone());
    if archive.private {
        if let Some(auth) = &ctx.config.archive_auth {
            with_credentials(&mut url, &auth.user, &auth.password);
        }
    }
    let components = if archive.purpose.is_main() {
        "main restricted universe multiverse"
    } else {
        "main"
    };
    format!("deb {} {} {}", url, series.suite(pocket), components)
}

fn with_credentials(url: &mut Url, user: &str, password: &str) {
    if url.set_username(user).is_err() || url.set_password(Some(password)).is_err() {
        warn!(url = %url, "Cannot embed archive credentials");
    }
}

/// Run the RPC sequence that starts `candidate` on `builder`.
async fn start(
    client: &dyn WorkerClient,
    builder: &Builder,
    candidate: &Candidate,
    request: &BuildRequest,
) -> Attempt {
    if builder.virtualized {
        match client.resume().await {
            Ok(out) if out.exit_code == 0 => {}
            Ok(out) => {
                return Attempt::ResumeFailed(WorkerError::Protocol(format!(
                    "resume exited with {}: {}",
                    out.exit_code,
                    out.stderr.trim()
                )));
            }
            Err(e) => return Attempt::ResumeFailed(e),
        }
    }

    let info = match client.info().await {
        Ok(info) => info,
        Err(e) => return Attempt::Failed(e),
    };
    if info.protocol_version != PROTOCOL_VERSION {
        return Attempt::Mismatch(format!("protocol version {}", info.protocol_version));
    }
    if info.arch_tag != candidate.build.arch_tag {
        return Attempt::Mismatch(format!(
            "builder is {}, build needs {}",
            info.arch_tag, candidate.build.arch_tag
        ));
    }

    let (user, password) = match &request.credentials {
        Some((u, p)) => (Some(u.as_str()), Some(p.as_str())),
        None => (None, None),
    };

    let chroot = &request.chroot;
    match client
        .ensure_present(&chroot.sha1, chroot.url.as_str(), None, None)
        .await
    {
        Ok(reply) if reply.present => {}
        Ok(reply) => return Attempt::Aborted(format!("chroot unavailable: {}", reply.info)),
        Err(e) => return Attempt::Failed(e),
    }

    for file in &candidate.build.files {
        match client
            .ensure_present(&file.sha1, file.url.as_str(), user, password)
            .await
        {
            Ok(reply) if reply.present => {}
            Ok(reply) => {
                return Attempt::Aborted(format!("{} unavailable: {}", file.name, reply.info));
            }
            Err(e) => return Attempt::Failed(e),
        }
    }

    match client
        .build(
            &candidate.job.cookie(),
            &request.distro,
            &chroot.sha1,
            &request.filemap,
            &request.args,
        )
        .await
    {
        Ok(reply) if reply.is_building() => Attempt::Started,
        Ok(reply) => Attempt::Failed(WorkerError::Protocol(format!(
            "build refused: {} {}",
            reply.status, reply.info
        ))),
        Err(e) => Attempt::Failed(e),
    }
}

async fn mark_started(
    ctx: &ScanContext<'_>,
    pools: &mut BuilderPools,
    candidate: &mut Candidate,
    builder: &mut Builder,
) -> SchedulerResult<()> {
    let job = &mut candidate.job;
    job.builder = Some(builder.id);
    job.started_at = Some(ctx.now);
    job.logtail = None;
    ctx.catalog.update_job(job).await?;

    let build = &mut candidate.build;
    build.state = BuildState::Building;
    build.builder = Some(builder.id);
    build.started_at = Some(ctx.now);
    ctx.catalog.update_build(build).await?;

    if builder.failure_count > 0 {
        builder.failure_count = 0;
        ctx.catalog.update_builder(builder).await?;
    }
    pools.mark_busy(builder.id, Some(job.id));
    ctx.catalog.commit().await?;

    info!(
        build = %build.id,
        job = %job.id,
        builder = %builder.name,
        score = job.score,
        "Dispatched {}",
        build.title()
    );
    Ok(())
}
