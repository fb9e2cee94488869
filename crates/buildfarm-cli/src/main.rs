//! buildfarm CLI tool.

use buildfarm_core::ArchivePurpose;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "buildfarm")]
#[command(about = "Build farm scheduler", long_about = None)]
struct Cli {
    /// Scheduler configuration file
    #[arg(long, global = true, env = "BUILDFARM_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog snapshot file, overriding the configuration
    #[arg(long, global = true, env = "BUILDFARM_CATALOG")]
    catalog: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle: collect results, queue, score and dispatch
    Scan {
        /// Archive class to scan (primary, partner, ppa, debug, copy); repeatable
        #[arg(long = "archive", value_parser = parse_purpose)]
        archives: Vec<ArchivePurpose>,
        /// Also probe failed builders and recover the ones that answer
        #[arg(long)]
        careful: bool,
    },
    /// Show builder health
    Builders {
        /// Ping every builder
        #[arg(long)]
        probe: bool,
    },
    /// Validate a scheduler configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "buildfarm.kdl")]
        path: PathBuf,
    },
}

fn parse_purpose(s: &str) -> Result<ArchivePurpose, String> {
    s.parse().map_err(|e: buildfarm_core::Error| e.to_string())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Scan { archives, careful } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let clean = commands::scan::run(config, cli.catalog, archives, careful).await?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::Builders { probe } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::builders::list(config, cli.catalog, probe).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
