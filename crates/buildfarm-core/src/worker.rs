//! Worker client trait and protocol types.
//!
//! A builder exposes a small RPC surface. The status sentence a builder
//! returns has a shape that depends on its state; it is decoded once at the
//! RPC boundary into [`BuilderStatus`].

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::{BuildId, Builder, JobId};

/// Protocol version this scheduler speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Filename to sha1 of its content.
pub type FileMap = BTreeMap<String, String>;

/// Errors talking to a builder.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Opaque identifier handed to a builder with a build, combining the build
/// and job ids so results match unambiguously across scheduler restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{build}-{job}")]
pub struct BuildCookie {
    pub build: BuildId,
    pub job: JobId,
}

impl FromStr for BuildCookie {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorkerError::Protocol(format!("malformed build cookie: {}", s));
        let (build, job) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            build: build.parse().map_err(|_| invalid())?,
            job: job.parse().map_err(|_| invalid())?,
        })
    }
}

/// Reply to `info()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub protocol_version: String,
    pub arch_tag: String,
    pub mechanisms: Vec<String>,
}

/// How a finished build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum BuildOutcome {
    #[display("ok")]
    Ok,
    #[display("package-failure")]
    PackageFailure,
    #[display("dependency-failure")]
    DependencyFailure,
    #[display("chroot-failure")]
    ChrootFailure,
    #[display("builder-failure")]
    BuilderFailure,
}

/// Decoded status sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderStatus {
    Idle,
    Building {
        cookie: String,
        logtail: String,
    },
    Waiting {
        cookie: String,
        outcome: BuildOutcome,
        filemap: FileMap,
        dependencies: Option<String>,
    },
}

/// Reply to `ensurepresent()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsurePresent {
    pub present: bool,
    pub info: String,
}

/// Reply to `build()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReply {
    pub status: String,
    pub info: String,
}

impl BuildReply {
    pub const BUILDING: &'static str = "building";

    pub fn is_building(&self) -> bool {
        self.status == Self::BUILDING
    }
}

/// Reply to `resume()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Extra arguments passed with `build()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArgs {
    pub arch_indep: bool,
    /// `series` or `series-pocket`.
    pub suite: String,
    pub ogrecomponent: String,
    pub archive_purpose: String,
    /// Extra source lines the builder should consult.
    pub archives: Vec<String>,
    pub archive_private: bool,
}

/// RPC surface of a remote builder.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Protocol version, architecture tag and build mechanisms.
    async fn info(&self) -> WorkerResult<WorkerInfo>;

    /// Current status sentence.
    async fn status(&self) -> WorkerResult<BuilderStatus>;

    /// Make sure a file is cached on the builder, fetching it if needed.
    async fn ensure_present(
        &self,
        sha1: &str,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> WorkerResult<EnsurePresent>;

    /// Start a build.
    async fn build(
        &self,
        cookie: &BuildCookie,
        distro: &str,
        chroot_sha1: &str,
        filemap: &FileMap,
        args: &BuildArgs,
    ) -> WorkerResult<BuildReply>;

    async fn abort(&self) -> WorkerResult<()>;

    async fn clean(&self) -> WorkerResult<()>;

    /// Health probe, returns its argument.
    async fn echo(&self, token: &str) -> WorkerResult<String>;

    /// Restart the virtual machine backing the builder.
    async fn resume(&self) -> WorkerResult<ResumeOutput>;
}

/// Opens clients for builders.
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, builder: &Builder) -> Arc<dyn WorkerClient>;
}
