//! Catalog trait: the persistence seam the scheduler works against.
//!
//! The catalog owns builders, builds, jobs, archives and publishing
//! records. Implementations must serialize concurrent writers; the scheduler
//! calls [`Catalog::commit`] at checkpoints after each major step of a scan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    Archive, ArchiveId, Build, BuildId, BuildState, Builder, Job, JobId, Pocket, ProcessorFamily,
    Result, Series,
};

/// A chroot tarball for one architecture, series and pocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chroot {
    pub arch_tag: String,
    pub series: String,
    pub pocket: Pocket,
    pub sha1: String,
    pub url: Url,
}

/// Publishing status of a source in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Pending,
    Published,
    Superseded,
    Deleted,
}

/// The current publication of a source package in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub archive: ArchiveId,
    pub source_name: String,
    /// Currently published version.
    pub version: String,
    pub status: PublicationStatus,
}

impl Publication {
    /// Whether `build` is no longer the current revision of its source.
    pub fn supersedes(&self, build: &Build) -> bool {
        self.version != build.source_version
            || matches!(
                self.status,
                PublicationStatus::Superseded | PublicationStatus::Deleted
            )
    }

    pub fn is_visible(&self) -> bool {
        self.status == PublicationStatus::Published
    }
}

/// An already built binary package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPackage {
    pub name: String,
    pub version: String,
    pub archive: ArchiveId,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// All registered builders.
    async fn builders(&self) -> Result<Vec<Builder>>;

    async fn update_builder(&self, builder: &Builder) -> Result<()>;

    async fn archive(&self, id: ArchiveId) -> Result<Archive>;

    async fn series(&self, name: &str) -> Result<Series>;

    async fn build(&self, id: BuildId) -> Result<Build>;

    async fn update_build(&self, build: &Build) -> Result<()>;

    /// Builds needing a build in the given families that have no job yet.
    async fn pending_builds_for_families(
        &self,
        families: &[ProcessorFamily],
    ) -> Result<Vec<Build>>;

    /// Jobs currently assigned to a builder.
    async fn active_jobs(&self) -> Result<Vec<Job>>;

    /// Jobs of the given families whose build is in `state`.
    async fn candidates(&self, families: &[ProcessorFamily], state: BuildState)
    -> Result<Vec<Job>>;

    /// Create the queue entry for a build. Fails if one exists.
    async fn create_job_for(&self, build: &Build) -> Result<Job>;

    async fn update_job(&self, job: &Job) -> Result<()>;

    async fn destroy_job(&self, id: JobId) -> Result<()>;

    async fn chroot(&self, arch_tag: &str, series: &str, pocket: Pocket)
    -> Result<Option<Chroot>>;

    /// Current publication of the build's source in its archive.
    async fn current_publication(&self, build: &Build) -> Result<Option<Publication>>;

    /// Highest version of binary `name` in the first archive of `archives`
    /// that has one.
    async fn find_binary(&self, name: &str, archives: &[ArchiveId])
    -> Result<Option<BinaryPackage>>;

    /// Make the changes so far durable.
    async fn commit(&self) -> Result<()>;
}
