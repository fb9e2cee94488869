//! Scan cycle orchestration.

use buildfarm_config::SchedulerConfig;
use buildfarm_core::ProcessorFamily;
use buildfarm_core::catalog::Catalog;
use buildfarm_core::worker::WorkerConnector;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use crate::SchedulerResult;
use crate::collect::{RefreshReport, refresh_pools};
use crate::context::{ScanContext, ScanOptions};
use crate::dispatch::{FamilyReport, dispatch_family};
use crate::retry::{RetryReport, retry_depwait};

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub refresh: RefreshReport,
    pub jobs_created: usize,
    pub retry: RetryReport,
    pub families: Vec<FamilyReport>,
    /// Errors that aborted a step for one family.
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn dispatched(&self) -> usize {
        self.families.iter().map(|f| f.dispatched).sum()
    }

    fn record_error(&mut self, step: &str, family: &ProcessorFamily, message: String) {
        error!(step, family = %family, error = %message, "Scan step failed");
        self.errors.push(format!("{} {}: {}", step, family, message));
    }
}

/// Runs scan cycles against a catalog and a set of builders.
pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    connector: Arc<dyn WorkerConnector>,
    config: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        connector: Arc<dyn WorkerConnector>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            catalog,
            connector,
            config,
        }
    }

    /// Run one full pass: refresh pools, create missing jobs, retry
    /// dependency waits, then score and dispatch each family.
    ///
    /// A failure while refreshing aborts the cycle. Failures in later steps
    /// are confined to their family and recorded in the report.
    pub async fn run_cycle(&self, options: &ScanOptions) -> SchedulerResult<CycleReport> {
        let mut ctx = ScanContext::new(
            self.catalog.as_ref(),
            self.connector.as_ref(),
            &self.config,
            options,
            Utc::now(),
        );
        let mut report = CycleReport::default();

        let (mut pools, refresh) = refresh_pools(&ctx).await?;
        report.refresh = refresh;
        let families = pools.families();

        for family in &families {
            match create_jobs(&mut ctx, family).await {
                Ok(created) => report.jobs_created += created,
                Err(e) => report.record_error("create-jobs", family, e.to_string()),
            }
        }

        for family in &families {
            match retry_depwait(&mut ctx, std::slice::from_ref(family)).await {
                Ok(retry) => {
                    report.retry.examined += retry.examined;
                    report.retry.released += retry.released;
                    report.retry.narrowed += retry.narrowed;
                    report.retry.unparsable += retry.unparsable;
                }
                Err(e) => report.record_error("retry-depwait", family, e.to_string()),
            }
        }

        for family in &families {
            match dispatch_family(&mut ctx, &mut pools, family).await {
                Ok(family_report) => report.families.push(family_report),
                Err(e) => report.record_error("dispatch", family, e.to_string()),
            }
        }

        info!(
            families = families.len(),
            jobs_created = report.jobs_created,
            released = report.retry.released,
            dispatched = report.dispatched(),
            errors = report.errors.len(),
            "Scan cycle complete"
        );
        Ok(report)
    }
}

/// Queue a job for every needs-build build of `family` that has none.
async fn create_jobs(ctx: &mut ScanContext<'_>, family: &ProcessorFamily) -> SchedulerResult<usize> {
    let mut created = 0;
    for build in ctx
        .catalog
        .pending_builds_for_families(std::slice::from_ref(family))
        .await?
    {
        let archive = ctx.archive(build.archive).await?;
        if !ctx.options.selects(&archive) {
            continue;
        }
        let job = ctx.catalog.create_job_for(&build).await?;
        info!(build = %build.id, job = %job.id, "Queued {}", build.title());
        created += 1;
    }
    ctx.catalog.commit().await?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CatalogAssertions, FakeConnector, fixture_snapshot, refused};
    use async_trait::async_trait;
    use buildfarm_catalog::MemoryCatalog;
    use buildfarm_core::catalog::{BinaryPackage, Chroot, Publication};
    use buildfarm_core::{
        Archive, ArchiveId, Build, BuildId, BuildState, Builder, Job, JobId, Pocket, Series,
    };

    fn orchestrator(catalog: Arc<MemoryCatalog>, connector: Arc<FakeConnector>) -> Orchestrator {
        Orchestrator::new(catalog, connector, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let mut snapshot = fixture_snapshot();
        // A build without a job yet.
        let mut extra = snapshot.builds[0].clone();
        extra.id = BuildId(20);
        extra.source_name = "extra".to_string();
        snapshot.builds.push(extra);
        let catalog = Arc::new(MemoryCatalog::new(snapshot).unwrap());
        let connector = Arc::new(FakeConnector::new());

        let report = orchestrator(catalog.clone(), connector.clone())
            .run_cycle(&ScanOptions::default())
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.jobs_created, 1);
        assert_eq!(report.refresh.probed, 4);
        assert_eq!(report.dispatched(), 4);
        for id in [10, 11, 12, 20] {
            assert_eq!(catalog.build_state(BuildId(id)), BuildState::Building);
        }
        assert_eq!(connector.worker("arm01").builds()[0].cookie, "12-3");
    }

    #[tokio::test]
    async fn test_released_depwait_dispatches_same_cycle() {
        let mut snapshot = fixture_snapshot();
        snapshot.builds[0].state = BuildState::ManualDepWait;
        snapshot.jobs[0].dependencies = Some("libfoo (>= 2.0)".to_string());
        let catalog = Arc::new(MemoryCatalog::new(snapshot).unwrap());
        let connector = Arc::new(FakeConnector::new());

        let report = orchestrator(catalog.clone(), connector)
            .run_cycle(&ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(report.retry.released, 1);
        assert_eq!(catalog.build_state(BuildId(10)), BuildState::Building);
    }

    #[tokio::test]
    async fn test_builder_failure_does_not_fail_cycle() {
        let catalog = Arc::new(MemoryCatalog::new(fixture_snapshot()).unwrap());
        let connector = Arc::new(FakeConnector::new());
        connector.worker("alpha").set_build(Err(refused()));

        let report = orchestrator(catalog.clone(), connector.clone())
            .run_cycle(&ScanOptions::default())
            .await
            .unwrap();
        assert!(report.is_clean());
        assert!(!catalog.builder_named("alpha").ok);
        assert_eq!(catalog.build_state(BuildId(10)), BuildState::NeedsBuild);

        let report = orchestrator(catalog.clone(), connector.clone())
            .run_cycle(&ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(report.refresh.probed, 3);
        assert_eq!(catalog.build_state(BuildId(10)), BuildState::Building);
        assert_eq!(connector.worker("bravo").builds()[0].cookie, "10-1");
    }

    /// Delegates to a memory catalog but fails chroot lookups for one
    /// architecture.
    struct BrokenChroots {
        inner: MemoryCatalog,
        arch_tag: &'static str,
    }

    #[async_trait]
    impl Catalog for BrokenChroots {
        async fn builders(&self) -> buildfarm_core::Result<Vec<Builder>> {
            self.inner.builders().await
        }
        async fn update_builder(&self, builder: &Builder) -> buildfarm_core::Result<()> {
            self.inner.update_builder(builder).await
        }
        async fn archive(&self, id: ArchiveId) -> buildfarm_core::Result<Archive> {
            self.inner.archive(id).await
        }
        async fn series(&self, name: &str) -> buildfarm_core::Result<Series> {
            self.inner.series(name).await
        }
        async fn build(&self, id: BuildId) -> buildfarm_core::Result<Build> {
            self.inner.build(id).await
        }
        async fn update_build(&self, build: &Build) -> buildfarm_core::Result<()> {
            self.inner.update_build(build).await
        }
        async fn pending_builds_for_families(
            &self,
            families: &[ProcessorFamily],
        ) -> buildfarm_core::Result<Vec<Build>> {
            self.inner.pending_builds_for_families(families).await
        }
        async fn active_jobs(&self) -> buildfarm_core::Result<Vec<Job>> {
            self.inner.active_jobs().await
        }
        async fn candidates(
            &self,
            families: &[ProcessorFamily],
            state: BuildState,
        ) -> buildfarm_core::Result<Vec<Job>> {
            self.inner.candidates(families, state).await
        }
        async fn create_job_for(&self, build: &Build) -> buildfarm_core::Result<Job> {
            self.inner.create_job_for(build).await
        }
        async fn update_job(&self, job: &Job) -> buildfarm_core::Result<()> {
            self.inner.update_job(job).await
        }
        async fn destroy_job(&self, id: JobId) -> buildfarm_core::Result<()> {
            self.inner.destroy_job(id).await
        }
        async fn chroot(
            &self,
            arch_tag: &str,
            series: &str,
            pocket: Pocket,
        ) -> buildfarm_core::Result<Option<Chroot>> {
            if arch_tag == self.arch_tag {
                return Err(buildfarm_core::Error::Storage("librarian unavailable".to_string()));
            }
            self.inner.chroot(arch_tag, series, pocket).await
        }
        async fn current_publication(
            &self,
            build: &Build,
        ) -> buildfarm_core::Result<Option<Publication>> {
            self.inner.current_publication(build).await
        }
        async fn find_binary(
            &self,
            name: &str,
            archives: &[ArchiveId],
        ) -> buildfarm_core::Result<Option<BinaryPackage>> {
            self.inner.find_binary(name, archives).await
        }
        async fn commit(&self) -> buildfarm_core::Result<()> {
            self.inner.commit().await
        }
    }

    #[tokio::test]
    async fn test_family_error_is_isolated() {
        let catalog = Arc::new(BrokenChroots {
            inner: MemoryCatalog::new(fixture_snapshot()).unwrap(),
            arch_tag: "amd64",
        });
        let connector = Arc::new(FakeConnector::new());

        let report = Orchestrator::new(catalog.clone(), connector, SchedulerConfig::default())
            .run_cycle(&ScanOptions::default())
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("dispatch x86"));
        assert_eq!(report.families.len(), 1);
        assert_eq!(report.families[0].family, "arm64");
        assert_eq!(catalog.inner.build_state(BuildId(12)), BuildState::Building);
        assert_eq!(catalog.inner.build_state(BuildId(10)), BuildState::NeedsBuild);
    }
}
