//! State shared by the steps of one scan.

use buildfarm_config::SchedulerConfig;
use buildfarm_core::catalog::Catalog;
use buildfarm_core::worker::WorkerConnector;
use buildfarm_core::{Archive, ArchiveId, ArchivePurpose, Series};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Options for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Archive classes to consider. Empty means all.
    pub archives: Vec<ArchivePurpose>,
    /// Probe failed builders too and recover those that answer.
    pub careful: bool,
}

impl ScanOptions {
    pub fn includes(&self, purpose: ArchivePurpose) -> bool {
        self.archives.is_empty() || self.archives.contains(&purpose)
    }

    /// Whether jobs in `archive` are in scope for this scan.
    pub fn selects(&self, archive: &Archive) -> bool {
        archive.enabled && self.includes(archive.purpose)
    }
}

pub struct ScanContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub connector: &'a dyn WorkerConnector,
    pub config: &'a SchedulerConfig,
    pub options: &'a ScanOptions,
    pub now: DateTime<Utc>,
    archives: HashMap<ArchiveId, Archive>,
    series: HashMap<String, Series>,
}

impl<'a> ScanContext<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        connector: &'a dyn WorkerConnector,
        config: &'a SchedulerConfig,
        options: &'a ScanOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            catalog,
            connector,
            config,
            options,
            now,
            archives: HashMap::new(),
            series: HashMap::new(),
        }
    }

    /// Look an archive up, caching it for the rest of the scan.
    pub async fn archive(&mut self, id: ArchiveId) -> buildfarm_core::Result<Archive> {
        if let Some(archive) = self.archives.get(&id) {
            return Ok(archive.clone());
        }
        let archive = self.catalog.archive(id).await?;
        self.archives.insert(id, archive.clone());
        Ok(archive)
    }

    pub async fn series(&mut self, name: &str) -> buildfarm_core::Result<Series> {
        if let Some(series) = self.series.get(name) {
            return Ok(series.clone());
        }
        let series = self.catalog.series(name).await?;
        self.series.insert(name.to_string(), series.clone());
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(purpose: ArchivePurpose, enabled: bool) -> Archive {
        Archive {
            id: ArchiveId(1),
            name: "test".to_string(),
            purpose,
            private: false,
            require_virtualized: false,
            enabled,
            relative_build_score: 0,
            dependencies: vec![],
        }
    }

    #[test]
    fn test_empty_selection_means_all() {
        let options = ScanOptions::default();
        for purpose in ArchivePurpose::ALL {
            assert!(options.includes(purpose));
        }
    }

    #[test]
    fn test_selection_filters_classes_and_disabled_archives() {
        let options = ScanOptions {
            archives: vec![ArchivePurpose::Ppa],
            careful: false,
        };
        assert!(options.selects(&archive(ArchivePurpose::Ppa, true)));
        assert!(!options.selects(&archive(ArchivePurpose::Ppa, false)));
        assert!(!options.selects(&archive(ArchivePurpose::Primary, true)));
    }
}
