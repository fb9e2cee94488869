//! CLI command implementations.

pub mod builders;
pub mod scan;

use anyhow::{Context, Result};
use buildfarm_catalog::MemoryCatalog;
use buildfarm_config::{SchedulerConfig, load_scheduler_config, parse_scheduler_config};
use std::path::{Path, PathBuf};

/// Load the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => load_scheduler_config(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

/// Open the catalog named on the command line or in the configuration.
pub async fn open_catalog(
    config: &SchedulerConfig,
    catalog: Option<PathBuf>,
) -> Result<MemoryCatalog> {
    let path = catalog
        .or_else(|| config.catalog.clone())
        .context("No catalog configured; pass --catalog or set `catalog` in the config")?;
    MemoryCatalog::open(&path)
        .await
        .with_context(|| format!("Failed to open catalog: {}", path.display()))
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    match parse_scheduler_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  rpc timeout:    {}s", config.rpc_timeout.as_secs());
            println!("  resume timeout: {}s", config.resume_timeout.as_secs());
            println!("  archive root:   {}", config.archive_root);
            if let Some(catalog) = &config.catalog {
                println!("  catalog:        {}", catalog.display());
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
