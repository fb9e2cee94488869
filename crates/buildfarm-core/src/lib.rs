//! Core domain types and traits for the buildfarm scheduler.
//!
//! This crate contains:
//! - Numeric identifiers for builds, jobs, builders and archives
//! - Builders, processor families, builds, jobs and archives
//! - Series, pockets and upload policy
//! - Debian version ordering
//! - The catalog trait (persistence seam)
//! - The worker client trait (remote builder RPC seam)

pub mod archive;
pub mod build;
pub mod builder;
pub mod catalog;
pub mod error;
pub mod id;
pub mod job;
pub mod series;
pub mod version;
pub mod worker;

pub use archive::{Archive, ArchivePurpose};
pub use build::{Build, BuildState, Component, SourceFile, Urgency};
pub use builder::{Builder, ProcessorFamily};
pub use catalog::Catalog;
pub use error::{Error, Result};
pub use id::{ArchiveId, BuildId, BuilderId, JobId};
pub use job::Job;
pub use series::{Pocket, Series, SeriesStatus};
pub use version::DebVersion;
