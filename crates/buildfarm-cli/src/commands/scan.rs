//! The scan command.

use anyhow::{Context, Result};
use buildfarm_config::SchedulerConfig;
use buildfarm_core::ArchivePurpose;
use buildfarm_scheduler::{Orchestrator, ScanOptions};
use buildfarm_worker::HttpConnector;
use std::path::PathBuf;
use std::sync::Arc;

/// Run one scan cycle. Returns whether every step completed.
pub async fn run(
    config: SchedulerConfig,
    catalog: Option<PathBuf>,
    archives: Vec<ArchivePurpose>,
    careful: bool,
) -> Result<bool> {
    let catalog = Arc::new(super::open_catalog(&config, catalog).await?);
    let connector = HttpConnector::new(config.rpc_timeout, config.resume_timeout)
        .context("Failed to create builder client")?;

    let options = ScanOptions {
        archives: if archives.is_empty() {
            config.archives.clone()
        } else {
            archives
        },
        careful,
    };

    let orchestrator = Orchestrator::new(catalog, Arc::new(connector), config);
    let report = orchestrator
        .run_cycle(&options)
        .await
        .context("Scan cycle failed")?;

    println!(
        "Probed {} builders ({} idle, {} building, {} failed)",
        report.refresh.probed, report.refresh.idle, report.refresh.building, report.refresh.failed
    );
    println!("Collected {} finished builds", report.refresh.collected);
    println!("Queued {} new jobs", report.jobs_created);
    println!(
        "Released {} of {} dependency waits",
        report.retry.released, report.retry.examined
    );
    for family in &report.families {
        println!(
            "  {}: {} dispatched of {} candidates, {} skipped, {} superseded",
            family.family, family.dispatched, family.candidates, family.skipped, family.superseded
        );
    }
    for error in &report.errors {
        eprintln!("error: {}", error);
    }

    Ok(report.is_clean())
}
