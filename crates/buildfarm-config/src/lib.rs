//! KDL configuration parsing for the buildfarm scheduler.
//!
//! This crate handles parsing of the scheduler configuration file
//! (buildfarm.kdl).

pub mod error;
pub mod scheduler;

pub use error::{ConfigError, ConfigResult};
pub use scheduler::{ArchiveAuth, SchedulerConfig, load_scheduler_config, parse_scheduler_config};
