//! The builders command.

use anyhow::{Context, Result};
use buildfarm_config::SchedulerConfig;
use buildfarm_core::catalog::Catalog;
use buildfarm_core::worker::WorkerConnector;
use buildfarm_worker::HttpConnector;
use futures::future::join_all;
use std::path::PathBuf;

const PROBE_TOKEN: &str = "buildfarm-probe";

/// Print every builder with its health, optionally pinging each one.
pub async fn list(config: SchedulerConfig, catalog: Option<PathBuf>, probe: bool) -> Result<()> {
    let catalog = super::open_catalog(&config, catalog).await?;
    let mut builders = catalog.builders().await.context("Failed to list builders")?;
    builders.sort_by(|a, b| a.family.cmp(&b.family).then(a.name.cmp(&b.name)));

    let replies = if probe {
        let connector = HttpConnector::new(config.rpc_timeout, config.resume_timeout)
            .context("Failed to create builder client")?;
        join_all(builders.iter().map(|builder| {
            let client = connector.connect(builder);
            async move {
                match client.echo(PROBE_TOKEN).await {
                    Ok(reply) if reply == PROBE_TOKEN => "answered".to_string(),
                    Ok(reply) => format!("bad echo: {}", reply),
                    Err(e) => e.to_string(),
                }
            }
        }))
        .await
    } else {
        vec![String::new(); builders.len()]
    };

    println!(
        "{:<20} {:<10} {:<6} {:<8} {:<8} NOTE",
        "NAME", "FAMILY", "VIRT", "STATUS", "FAILS"
    );
    for (builder, reply) in builders.iter().zip(replies) {
        let status = if builder.manual {
            "manual"
        } else if builder.ok {
            "ok"
        } else {
            "failed"
        };
        let note = if reply.is_empty() {
            builder.failure_note.clone().unwrap_or_default()
        } else {
            reply
        };
        println!(
            "{:<20} {:<10} {:<6} {:<8} {:<8} {}",
            builder.name,
            builder.family,
            if builder.virtualized { "yes" } else { "no" },
            status,
            builder.failure_count,
            note
        );
    }
    Ok(())
}
