//! Archives builds are uploaded into.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::series::{Pocket, Series, SeriesStatus};
use crate::{ArchiveId, Error};

/// What an archive is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePurpose {
    #[display("primary")]
    Primary,
    #[display("partner")]
    Partner,
    #[display("ppa")]
    Ppa,
    #[display("debug")]
    Debug,
    #[display("copy")]
    Copy,
}

impl ArchivePurpose {
    pub const ALL: [ArchivePurpose; 5] = [
        ArchivePurpose::Primary,
        ArchivePurpose::Partner,
        ArchivePurpose::Ppa,
        ArchivePurpose::Debug,
        ArchivePurpose::Copy,
    ];

    /// Whether the distribution's series policy governs uploads.
    pub fn is_main(self) -> bool {
        matches!(
            self,
            ArchivePurpose::Primary | ArchivePurpose::Partner | ArchivePurpose::Debug
        )
    }
}

impl FromStr for ArchivePurpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ArchivePurpose::Primary),
            "partner" => Ok(ArchivePurpose::Partner),
            "ppa" => Ok(ArchivePurpose::Ppa),
            "debug" => Ok(ArchivePurpose::Debug),
            "copy" => Ok(ArchivePurpose::Copy),
            other => Err(Error::InvalidInput(format!(
                "unknown archive purpose: {}",
                other
            ))),
        }
    }
}

/// An archive that receives built binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Unique identifier.
    pub id: ArchiveId,
    /// Archive name (e.g. "primary" or "~user/ppa").
    pub name: String,
    /// Archive purpose.
    pub purpose: ArchivePurpose,
    /// Sources are not publicly visible.
    #[serde(default)]
    pub private: bool,
    /// Builds must run on virtualized builders.
    #[serde(default)]
    pub require_virtualized: bool,
    /// Disabled archives are never scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Operator-set adjustment added to every job score.
    #[serde(default)]
    pub relative_build_score: i64,
    /// Archives consulted, in order, after this one when resolving
    /// build-dependencies.
    #[serde(default)]
    pub dependencies: Vec<ArchiveId>,
}

fn default_true() -> bool {
    true
}

impl Archive {
    /// Whether this archive accepts builds for `series` in `pocket`.
    pub fn permits_upload(&self, series: &Series, pocket: Pocket) -> bool {
        if series.status == SeriesStatus::Obsolete {
            return false;
        }
        match self.purpose {
            ArchivePurpose::Primary | ArchivePurpose::Partner | ArchivePurpose::Debug => {
                series.can_upload_to_pocket(pocket)
            }
            ArchivePurpose::Ppa => pocket == Pocket::Release,
            ArchivePurpose::Copy => true,
        }
    }

    /// Archives searched for build-dependency candidates, highest priority
    /// first.
    pub fn search_path(&self) -> Vec<ArchiveId> {
        let mut path = vec![self.id];
        for dep in &self.dependencies {
            if !path.contains(dep) {
                path.push(*dep);
            }
        }
        path
    }
}
