//! Serializable catalog snapshot.

use buildfarm_core::catalog::{BinaryPackage, Chroot, Publication};
use buildfarm_core::{Archive, Build, Builder, Job, Series};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

use crate::{StoreError, StoreResult};

/// Everything the catalog holds, in a form that round-trips through JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub builders: Vec<Builder>,
    #[serde(default)]
    pub archives: Vec<Archive>,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub builds: Vec<Build>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub chroots: Vec<Chroot>,
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub binaries: Vec<BinaryPackage>,
}

impl CatalogSnapshot {
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check referential integrity and the one-job-per-build invariant.
    pub fn validate(&self) -> StoreResult<()> {
        unique("builder id", self.builders.iter().map(|b| b.id))?;
        unique("builder name", self.builders.iter().map(|b| b.name.as_str()))?;
        unique("archive id", self.archives.iter().map(|a| a.id))?;
        unique("series name", self.series.iter().map(|s| s.name.as_str()))?;
        unique("build id", self.builds.iter().map(|b| b.id))?;
        unique("job id", self.jobs.iter().map(|j| j.id))?;
        unique("job build", self.jobs.iter().map(|j| j.build))?;

        for build in &self.builds {
            if !self.archives.iter().any(|a| a.id == build.archive) {
                return Err(StoreError::Invalid(format!(
                    "build {} references unknown archive {}",
                    build.id, build.archive
                )));
            }
            if !self.series.iter().any(|s| s.name == build.series) {
                return Err(StoreError::Invalid(format!(
                    "build {} references unknown series {}",
                    build.id, build.series
                )));
            }
        }

        for job in &self.jobs {
            if !self.builds.iter().any(|b| b.id == job.build) {
                return Err(StoreError::Invalid(format!(
                    "job {} references unknown build {}",
                    job.id, job.build
                )));
            }
            if let Some(builder) = job.builder {
                if !self.builders.iter().any(|b| b.id == builder) {
                    return Err(StoreError::Invalid(format!(
                        "job {} assigned to unknown builder {}",
                        job.id, builder
                    )));
                }
            }
        }

        Ok(())
    }
}

fn unique<T, I>(what: &str, items: I) -> StoreResult<()>
where
    T: Eq + Hash + std::fmt::Display,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    for item in items {
        if let Some(dup) = seen.replace(item) {
            return Err(StoreError::Invalid(format!("duplicate {}: {}", what, dup)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "archives": [{"id": 1, "name": "primary", "purpose": "primary"}],
        "series": [{"name": "noble", "distribution": "ubuntu", "status": "development"}],
        "builds": [{
            "id": 10, "source_name": "hello", "source_version": "2.10-1",
            "component": "main", "urgency": "low", "family": "x86",
            "arch_tag": "amd64", "series": "noble", "pocket": "release",
            "archive": 1, "state": "needs-build"
        }],
        "jobs": [{"id": 1, "build": 10, "family": "x86", "virtualized": false,
                  "created_at": "2024-01-01T00:00:00Z"}]
    }"#;

    #[test]
    fn test_parse_valid_snapshot() {
        let snapshot = CatalogSnapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.builds.len(), 1);
        assert_eq!(snapshot.jobs.len(), 1);
        assert!(snapshot.builders.is_empty());
    }

    #[test]
    fn test_reject_second_job_for_build() {
        let mut snapshot = CatalogSnapshot::from_json(SNAPSHOT).unwrap();
        let mut dup = snapshot.jobs[0].clone();
        dup.id = buildfarm_core::JobId(2);
        snapshot.jobs.push(dup);
        assert!(matches!(
            snapshot.validate().unwrap_err(),
            StoreError::Invalid(msg) if msg.contains("job build")
        ));
    }

    #[test]
    fn test_reject_dangling_archive() {
        let mut snapshot = CatalogSnapshot::from_json(SNAPSHOT).unwrap();
        snapshot.archives.clear();
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_preserves_content() {
        let snapshot = CatalogSnapshot::from_json(SNAPSHOT).unwrap();
        let again = CatalogSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(snapshot, again);
    }
}
