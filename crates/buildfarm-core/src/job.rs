//! Build queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::BuildCookie;
use crate::{Archive, Build, BuildId, BuilderId, JobId, ProcessorFamily};

/// A scheduling record pairing a build with a priority score and an
/// optional builder assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// The build this job schedules.
    pub build: BuildId,
    pub family: ProcessorFamily,
    /// Must run on a virtualized builder.
    pub virtualized: bool,
    /// Priority, higher dispatches first.
    #[serde(default)]
    pub score: i64,
    pub created_at: DateTime<Utc>,
    /// Builder currently running the job.
    #[serde(default)]
    pub builder: Option<BuilderId>,
    /// Score was set by an operator and is never recomputed.
    #[serde(default)]
    pub manual: bool,
    /// Last observed build output.
    #[serde(default)]
    pub logtail: Option<String>,
    /// Pending build-dependency expression.
    #[serde(default)]
    pub dependencies: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create the queue entry for a freshly registered build.
    pub fn for_build(id: JobId, build: &Build, archive: &Archive, now: DateTime<Utc>) -> Self {
        Self {
            id,
            build: build.id,
            family: build.family.clone(),
            virtualized: archive.require_virtualized,
            score: 0,
            created_at: now,
            builder: None,
            manual: false,
            logtail: None,
            dependencies: None,
            started_at: None,
        }
    }

    /// Cookie identifying this job on a builder.
    pub fn cookie(&self) -> BuildCookie {
        BuildCookie {
            build: self.build,
            job: self.id,
        }
    }

    /// Seconds since the job was queued, never negative.
    pub fn waited_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    /// Detach the job from its builder so it can be dispatched again.
    pub fn reset(&mut self) {
        self.builder = None;
        self.logtail = None;
        self.started_at = None;
    }
}
