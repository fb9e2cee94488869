//! Builds: one attempt to compile a source package for one architecture.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::series::Pocket;
use crate::{ArchiveId, BuildId, BuilderId, ProcessorFamily};

/// Lifecycle state of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum BuildState {
    #[display("needs-build")]
    NeedsBuild,
    #[display("building")]
    Building,
    #[display("uploading")]
    Uploading,
    #[display("fully-built")]
    FullyBuilt,
    #[display("failed-to-build")]
    FailedToBuild,
    #[display("manual-dep-wait")]
    ManualDepWait,
    #[display("chroot-wait")]
    ChrootWait,
    #[display("superseded")]
    Superseded,
    #[display("failed-to-upload")]
    FailedToUpload,
}

impl BuildState {
    /// States in which the build keeps a queue entry.
    pub fn has_job(self) -> bool {
        matches!(
            self,
            BuildState::NeedsBuild | BuildState::Building | BuildState::ManualDepWait
        )
    }
}

/// Archive component of the source, a trust classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    #[display("main")]
    Main,
    #[display("restricted")]
    Restricted,
    #[display("universe")]
    Universe,
    #[display("multiverse")]
    Multiverse,
}

/// Upload urgency declared by the source package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[display("low")]
    Low,
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
    #[display("emergency")]
    Emergency,
}

/// A file of the source package that builders must fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub sha1: String,
    pub url: Url,
}

/// A build of a source package release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Unique identifier.
    pub id: BuildId,
    /// Source package name.
    pub source_name: String,
    /// Source package version.
    pub source_version: String,
    pub component: Component,
    pub urgency: Urgency,
    /// Processor family of the target architecture.
    pub family: ProcessorFamily,
    /// Target architecture tag (e.g. "amd64").
    pub arch_tag: String,
    /// Target series name.
    pub series: String,
    pub pocket: Pocket,
    /// Archive the binaries go to.
    pub archive: ArchiveId,
    /// Whether architecture-independent packages are built too.
    #[serde(default)]
    pub arch_indep: bool,
    /// Files the builder needs.
    #[serde(default)]
    pub files: Vec<SourceFile>,
    pub state: BuildState,
    /// Builder that ran (or is running) the build.
    #[serde(default)]
    pub builder: Option<BuilderId>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    /// Human readable title used in logs.
    pub fn title(&self) -> String {
        format!(
            "{} build of {} {} in {}",
            self.arch_tag, self.source_name, self.source_version, self.series
        )
    }

    /// Move the build to a finished state.
    pub fn finish(&mut self, state: BuildState, now: DateTime<Utc>) {
        self.state = state;
        self.finished_at = Some(now);
    }
}
