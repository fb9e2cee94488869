//! In-memory catalog implementation.

use async_trait::async_trait;
use buildfarm_core::catalog::{BinaryPackage, Catalog, Chroot, Publication};
use buildfarm_core::{
    Archive, ArchiveId, Build, BuildId, BuildState, Builder, BuilderId, DebVersion, Error, Job,
    JobId, Pocket, ProcessorFamily, Result, Series,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{CatalogSnapshot, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    builders: BTreeMap<BuilderId, Builder>,
    archives: BTreeMap<ArchiveId, Archive>,
    series: BTreeMap<String, Series>,
    builds: BTreeMap<BuildId, Build>,
    jobs: BTreeMap<JobId, Job>,
    chroots: Vec<Chroot>,
    publications: Vec<Publication>,
    binaries: Vec<BinaryPackage>,
    next_job_id: u64,
}

impl State {
    fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let next_job_id = snapshot.jobs.iter().map(|j| j.id.get()).max().unwrap_or(0) + 1;
        Self {
            builders: snapshot.builders.into_iter().map(|b| (b.id, b)).collect(),
            archives: snapshot.archives.into_iter().map(|a| (a.id, a)).collect(),
            series: snapshot
                .series
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
            builds: snapshot.builds.into_iter().map(|b| (b.id, b)).collect(),
            jobs: snapshot.jobs.into_iter().map(|j| (j.id, j)).collect(),
            chroots: snapshot.chroots,
            publications: snapshot.publications,
            binaries: snapshot.binaries,
            next_job_id,
        }
    }

    fn to_snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            builders: self.builders.values().cloned().collect(),
            archives: self.archives.values().cloned().collect(),
            series: self.series.values().cloned().collect(),
            builds: self.builds.values().cloned().collect(),
            jobs: self.jobs.values().cloned().collect(),
            chroots: self.chroots.clone(),
            publications: self.publications.clone(),
            binaries: self.binaries.clone(),
        }
    }

    fn job_for_build(&self, build: BuildId) -> Option<&Job> {
        self.jobs.values().find(|j| j.build == build)
    }
}

/// Catalog held in memory, optionally checkpointed to a JSON file on
/// every commit.
#[derive(Debug)]
pub struct MemoryCatalog {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryCatalog {
    /// Create a catalog from a snapshot, without a backing file.
    pub fn new(snapshot: CatalogSnapshot) -> StoreResult<Self> {
        snapshot.validate()?;
        Ok(Self {
            state: Mutex::new(State::from_snapshot(snapshot)),
            path: None,
        })
    }

    /// Load a catalog from a snapshot file; commits write back to it.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let json = tokio::fs::read_to_string(&path).await?;
        let snapshot = CatalogSnapshot::from_json(&json)?;
        debug!(path = %path.display(), builds = snapshot.builds.len(), "Loaded catalog snapshot");
        Ok(Self {
            state: Mutex::new(State::from_snapshot(snapshot)),
            path: Some(path),
        })
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoreResult<CatalogSnapshot> {
        Ok(self.lock()?.to_snapshot())
    }

    /// The job queued for a build, if any.
    pub fn job_for_build(&self, build: BuildId) -> StoreResult<Option<Job>> {
        Ok(self.lock()?.job_for_build(build).cloned())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    async fn write_snapshot(path: &Path, json: String) -> StoreResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> Error {
    Error::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn builders(&self) -> Result<Vec<Builder>> {
        Ok(self.lock()?.builders.values().cloned().collect())
    }

    async fn update_builder(&self, builder: &Builder) -> Result<()> {
        let mut state = self.lock()?;
        let slot = state
            .builders
            .get_mut(&builder.id)
            .ok_or_else(|| not_found("builder", builder.id))?;
        *slot = builder.clone();
        Ok(())
    }

    async fn archive(&self, id: ArchiveId) -> Result<Archive> {
        self.lock()?
            .archives
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("archive", id))
    }

    async fn series(&self, name: &str) -> Result<Series> {
        self.lock()?
            .series
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("series", name))
    }

    async fn build(&self, id: BuildId) -> Result<Build> {
        self.lock()?
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("build", id))
    }

    async fn update_build(&self, build: &Build) -> Result<()> {
        let mut state = self.lock()?;
        let slot = state
            .builds
            .get_mut(&build.id)
            .ok_or_else(|| not_found("build", build.id))?;
        *slot = build.clone();
        Ok(())
    }

    async fn pending_builds_for_families(
        &self,
        families: &[ProcessorFamily],
    ) -> Result<Vec<Build>> {
        let state = self.lock()?;
        Ok(state
            .builds
            .values()
            .filter(|b| b.state == BuildState::NeedsBuild)
            .filter(|b| families.contains(&b.family))
            .filter(|b| state.job_for_build(b.id).is_none())
            .cloned()
            .collect())
    }

    async fn active_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|j| j.builder.is_some())
            .cloned()
            .collect())
    }

    async fn candidates(
        &self,
        families: &[ProcessorFamily],
        build_state: BuildState,
    ) -> Result<Vec<Job>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|j| families.contains(&j.family))
            .filter(|j| {
                state
                    .builds
                    .get(&j.build)
                    .map(|b| b.state == build_state)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn create_job_for(&self, build: &Build) -> Result<Job> {
        let mut state = self.lock()?;
        if let Some(existing) = state.job_for_build(build.id) {
            return Err(Error::Conflict(format!(
                "build {} already has job {}",
                build.id, existing.id
            )));
        }
        let archive = state
            .archives
            .get(&build.archive)
            .cloned()
            .ok_or_else(|| not_found("archive", build.archive))?;

        let id = JobId(state.next_job_id);
        state.next_job_id += 1;
        let job = Job::for_build(id, build, &archive, Utc::now());
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut state = self.lock()?;
        let slot = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| not_found("job", job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn destroy_job(&self, id: JobId) -> Result<()> {
        self.lock()?
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("job", id))
    }

    async fn chroot(
        &self,
        arch_tag: &str,
        series: &str,
        pocket: Pocket,
    ) -> Result<Option<Chroot>> {
        Ok(self
            .lock()?
            .chroots
            .iter()
            .find(|c| c.arch_tag == arch_tag && c.series == series && c.pocket == pocket)
            .cloned())
    }

    async fn current_publication(&self, build: &Build) -> Result<Option<Publication>> {
        Ok(self
            .lock()?
            .publications
            .iter()
            .rev()
            .find(|p| p.archive == build.archive && p.source_name == build.source_name)
            .cloned())
    }

    async fn find_binary(
        &self,
        name: &str,
        archives: &[ArchiveId],
    ) -> Result<Option<BinaryPackage>> {
        let state = self.lock()?;
        for archive in archives {
            let best = state
                .binaries
                .iter()
                .filter(|b| b.name == name && b.archive == *archive)
                .filter_map(|b| match DebVersion::parse(&b.version) {
                    Ok(version) => Some((version, b)),
                    Err(e) => {
                        warn!(package = %b.name, version = %b.version, error = %e, "Skipping binary with invalid version");
                        None
                    }
                })
                .max_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, b)| b.clone());
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }

    async fn commit(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = self.lock()?.to_snapshot().to_json()?;
        Self::write_snapshot(path, json).await?;
        debug!(path = %path.display(), "Committed catalog snapshot");
        Ok(())
    }
}
