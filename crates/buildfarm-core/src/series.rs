//! Distribution series and pockets.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// A named sub-channel of a series governing upload policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Pocket {
    #[display("release")]
    Release,
    #[display("security")]
    Security,
    #[display("updates")]
    Updates,
    #[display("proposed")]
    Proposed,
    #[display("backports")]
    Backports,
}

impl Pocket {
    /// Suffix appended to the series name to form a suite.
    pub fn suffix(self) -> &'static str {
        match self {
            Pocket::Release => "",
            Pocket::Security => "-security",
            Pocket::Updates => "-updates",
            Pocket::Proposed => "-proposed",
            Pocket::Backports => "-backports",
        }
    }
}

impl FromStr for Pocket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "release" => Ok(Pocket::Release),
            "security" => Ok(Pocket::Security),
            "updates" => Ok(Pocket::Updates),
            "proposed" => Ok(Pocket::Proposed),
            "backports" => Ok(Pocket::Backports),
            other => Err(Error::InvalidInput(format!("unknown pocket: {}", other))),
        }
    }
}

/// Lifecycle status of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    #[display("experimental")]
    Experimental,
    #[display("development")]
    Development,
    #[display("frozen")]
    Frozen,
    #[display("current")]
    Current,
    #[display("supported")]
    Supported,
    #[display("obsolete")]
    Obsolete,
}

/// A release of a distribution (e.g. "noble").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Series name.
    pub name: String,
    /// Distribution name, sent to builders as the distro tag.
    pub distribution: String,
    /// Lifecycle status.
    pub status: SeriesStatus,
}

impl Series {
    /// Suite name for a pocket, e.g. `noble` or `noble-updates`.
    pub fn suite(&self, pocket: Pocket) -> String {
        format!("{}{}", self.name, pocket.suffix())
    }

    /// Whether the series status permits uploads to a pocket of a
    /// distribution-controlled archive.
    pub fn can_upload_to_pocket(&self, pocket: Pocket) -> bool {
        match self.status {
            SeriesStatus::Obsolete => false,
            SeriesStatus::Frozen => true,
            SeriesStatus::Experimental | SeriesStatus::Development => pocket == Pocket::Release,
            SeriesStatus::Current | SeriesStatus::Supported => pocket != Pocket::Release,
        }
    }
}
