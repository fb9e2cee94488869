//! Fixtures and a scripted worker for scheduler tests.

use async_trait::async_trait;
use buildfarm_catalog::{CatalogSnapshot, MemoryCatalog};
use buildfarm_core::catalog::{BinaryPackage, Chroot, Publication, PublicationStatus};
use buildfarm_core::worker::{
    BuildArgs, BuildCookie, BuildReply, BuilderStatus, EnsurePresent, FileMap, PROTOCOL_VERSION,
    ResumeOutput, WorkerClient, WorkerConnector, WorkerError, WorkerInfo, WorkerResult,
};
use buildfarm_core::{
    Archive, ArchiveId, ArchivePurpose, Build, BuildId, BuildState, Builder, BuilderId, Component,
    Job, JobId, Pocket, Series, SeriesStatus, SourceFile, Urgency,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

/// A single recorded `build` call.
#[derive(Debug, Clone)]
pub struct BuildCall {
    pub cookie: String,
    pub distro: String,
    pub chroot_sha1: String,
    pub filemap: FileMap,
    pub args: BuildArgs,
}

struct Script {
    info: WorkerResult<WorkerInfo>,
    status: WorkerResult<BuilderStatus>,
    missing: Vec<String>,
    build: WorkerResult<BuildReply>,
    resume: WorkerResult<ResumeOutput>,
    clean: WorkerResult<()>,
    calls: Vec<String>,
    builds: Vec<BuildCall>,
    credentials: Vec<(String, Option<String>)>,
}

/// Worker whose replies are set up by the test and whose calls are recorded.
pub struct FakeWorker {
    script: Mutex<Script>,
}

impl FakeWorker {
    pub fn new(arch_tag: &str) -> Self {
        Self {
            script: Mutex::new(Script {
                info: Ok(WorkerInfo {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    arch_tag: arch_tag.to_string(),
                    mechanisms: vec!["sbuild".to_string()],
                }),
                status: Ok(BuilderStatus::Idle),
                missing: Vec::new(),
                build: Ok(BuildReply {
                    status: BuildReply::BUILDING.to_string(),
                    info: String::new(),
                }),
                resume: Ok(ResumeOutput {
                    stdout: "resumed".to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                }),
                clean: Ok(()),
                calls: Vec::new(),
                builds: Vec::new(),
                credentials: Vec::new(),
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        f(&mut self.script.lock().unwrap())
    }

    pub fn set_info(&self, info: WorkerResult<WorkerInfo>) {
        self.with(|s| s.info = info);
    }

    pub fn set_status(&self, status: WorkerResult<BuilderStatus>) {
        self.with(|s| s.status = status);
    }

    pub fn set_missing(&self, sha1: &str) {
        self.with(|s| s.missing.push(sha1.to_string()));
    }

    pub fn set_build(&self, reply: WorkerResult<BuildReply>) {
        self.with(|s| s.build = reply);
    }

    pub fn set_resume(&self, out: WorkerResult<ResumeOutput>) {
        self.with(|s| s.resume = out);
    }

    pub fn set_clean(&self, result: WorkerResult<()>) {
        self.with(|s| s.clean = result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn builds(&self) -> Vec<BuildCall> {
        self.with(|s| s.builds.clone())
    }

    /// `(sha1, username)` of every ensurepresent call.
    pub fn credentials(&self) -> Vec<(String, Option<String>)> {
        self.with(|s| s.credentials.clone())
    }

    fn record(&self, call: &str) {
        self.with(|s| s.calls.push(call.to_string()));
    }
}

#[async_trait]
impl WorkerClient for FakeWorker {
    async fn info(&self) -> WorkerResult<WorkerInfo> {
        self.record("info");
        self.with(|s| s.info.clone())
    }

    async fn status(&self) -> WorkerResult<BuilderStatus> {
        self.record("status");
        self.with(|s| s.status.clone())
    }

    async fn ensure_present(
        &self,
        sha1: &str,
        _url: &str,
        username: Option<&str>,
        _password: Option<&str>,
    ) -> WorkerResult<EnsurePresent> {
        self.record("ensurepresent");
        self.with(|s| {
            s.credentials
                .push((sha1.to_string(), username.map(|u| u.to_string())));
            Ok(EnsurePresent {
                present: !s.missing.iter().any(|m| m == sha1),
                info: String::new(),
            })
        })
    }

    async fn build(
        &self,
        cookie: &BuildCookie,
        distro: &str,
        chroot_sha1: &str,
        filemap: &FileMap,
        args: &BuildArgs,
    ) -> WorkerResult<BuildReply> {
        self.record("build");
        self.with(|s| {
            s.builds.push(BuildCall {
                cookie: cookie.to_string(),
                distro: distro.to_string(),
                chroot_sha1: chroot_sha1.to_string(),
                filemap: filemap.clone(),
                args: args.clone(),
            });
            s.build.clone()
        })
    }

    async fn abort(&self) -> WorkerResult<()> {
        self.record("abort");
        Ok(())
    }

    async fn clean(&self) -> WorkerResult<()> {
        self.record("clean");
        self.with(|s| s.clean.clone())
    }

    async fn echo(&self, token: &str) -> WorkerResult<String> {
        self.record("echo");
        Ok(token.to_string())
    }

    async fn resume(&self) -> WorkerResult<ResumeOutput> {
        self.record("resume");
        self.with(|s| s.resume.clone())
    }
}

/// Hands out one [`FakeWorker`] per builder name.
#[derive(Default)]
pub struct FakeConnector {
    workers: Mutex<HashMap<String, Arc<FakeWorker>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The worker behind `name`, created on first use.
    pub fn worker(&self, name: &str) -> Arc<FakeWorker> {
        let arch_tag = if name.starts_with("arm") { "arm64" } else { "amd64" };
        self.workers
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FakeWorker::new(arch_tag)))
            .clone()
    }

    /// Every RPC made to any builder.
    pub fn total_calls(&self) -> usize {
        self.workers
            .lock()
            .unwrap()
            .values()
            .map(|w| w.calls().len())
            .sum()
    }
}

impl WorkerConnector for FakeConnector {
    fn connect(&self, builder: &Builder) -> Arc<dyn WorkerClient> {
        self.worker(&builder.name)
    }
}

pub fn builder(id: u64, name: &str, family: &str, virtualized: bool) -> Builder {
    Builder {
        id: BuilderId(id),
        name: name.to_string(),
        url: Url::parse(&format!("http://{}:8221/", name)).unwrap(),
        family: family.into(),
        virtualized,
        vm_host: virtualized.then(|| "vmhost01".to_string()),
        ok: true,
        failure_note: None,
        manual: false,
        speed_index: 1,
        failure_count: 0,
    }
}

fn archive(id: u64, name: &str, purpose: ArchivePurpose) -> Archive {
    Archive {
        id: ArchiveId(id),
        name: name.to_string(),
        purpose,
        private: false,
        require_virtualized: false,
        enabled: true,
        relative_build_score: 0,
        dependencies: vec![],
    }
}

pub fn build(
    id: u64,
    source: &str,
    component: Component,
    urgency: Urgency,
    family: &str,
    arch_tag: &str,
    archive: u64,
) -> Build {
    let file = format!("{}_1.0-1.dsc", source);
    Build {
        id: BuildId(id),
        source_name: source.to_string(),
        source_version: "1.0-1".to_string(),
        component,
        urgency,
        family: family.into(),
        arch_tag: arch_tag.to_string(),
        series: "noble".to_string(),
        pocket: Pocket::Release,
        archive: ArchiveId(archive),
        arch_indep: false,
        files: vec![SourceFile {
            url: Url::parse(&format!("http://ftpmaster.internal/pool/{}", file)).unwrap(),
            name: file,
            sha1: format!("sha-{}", source),
        }],
        state: BuildState::NeedsBuild,
        builder: None,
        started_at: None,
        finished_at: None,
    }
}

fn job(id: u64, build: &Build, virtualized: bool) -> Job {
    Job {
        id: JobId(id),
        build: build.id,
        family: build.family.clone(),
        virtualized,
        score: 0,
        created_at: Utc::now() - Duration::seconds(60),
        builder: None,
        manual: false,
        logtail: None,
        dependencies: None,
        started_at: None,
    }
}

fn publication(build: &Build) -> Publication {
    Publication {
        archive: build.archive,
        source_name: build.source_name.clone(),
        version: build.source_version.clone(),
        status: PublicationStatus::Published,
    }
}

/// A small farm:
///
/// - x86 builders `alpha`, `bravo` (physical) and `vm01` (virtual),
///   arm64 builder `arm01`
/// - archive 1 `ubuntu` (primary), archive 2 `ppa-widgets` (private,
///   virtualized, depends on 1)
/// - builds 10 `hello` (x86, primary), 11 `widget` (x86, ppa),
///   12 `gadget` (arm64, primary), each with a queued job
pub fn fixture_snapshot() -> CatalogSnapshot {
    let mut ppa = archive(2, "ppa-widgets", ArchivePurpose::Ppa);
    ppa.private = true;
    ppa.require_virtualized = true;
    ppa.dependencies = vec![ArchiveId(1)];

    let builds = vec![
        build(10, "hello", Component::Main, Urgency::Low, "x86", "amd64", 1),
        build(11, "widget", Component::Universe, Urgency::Medium, "x86", "amd64", 2),
        build(12, "gadget", Component::Main, Urgency::High, "arm64", "arm64", 1),
    ];
    let jobs = vec![
        job(1, &builds[0], false),
        job(2, &builds[1], true),
        job(3, &builds[2], false),
    ];

    CatalogSnapshot {
        builders: vec![
            builder(1, "alpha", "x86", false),
            builder(2, "bravo", "x86", false),
            builder(3, "vm01", "x86", true),
            builder(4, "arm01", "arm64", false),
        ],
        archives: vec![archive(1, "ubuntu", ArchivePurpose::Primary), ppa],
        series: vec![Series {
            name: "noble".to_string(),
            distribution: "ubuntu".to_string(),
            status: SeriesStatus::Development,
        }],
        publications: builds.iter().map(publication).collect(),
        builds,
        jobs,
        chroots: ["amd64", "arm64"]
            .into_iter()
            .map(|arch| Chroot {
                arch_tag: arch.to_string(),
                series: "noble".to_string(),
                pocket: Pocket::Release,
                sha1: format!("chroot-{}", arch),
                url: Url::parse(&format!("http://librarian.internal/chroot-{}.tar.gz", arch))
                    .unwrap(),
            })
            .collect(),
        binaries: vec![BinaryPackage {
            name: "libfoo".to_string(),
            version: "2.1".to_string(),
            archive: ArchiveId(1),
        }],
    }
}

pub fn fixture_catalog() -> MemoryCatalog {
    MemoryCatalog::new(fixture_snapshot()).unwrap()
}

/// Mark `build` as running on `builder` in a snapshot.
pub fn assign(snapshot: &mut CatalogSnapshot, build: BuildId, builder: BuilderId) {
    let b = snapshot.builds.iter_mut().find(|b| b.id == build).unwrap();
    b.state = BuildState::Building;
    b.builder = Some(builder);
    let j = snapshot.jobs.iter_mut().find(|j| j.build == build).unwrap();
    j.builder = Some(builder);
    j.started_at = Some(Utc::now());
}

/// Synchronous lookups for assertions.
pub trait CatalogAssertions {
    fn builder_named(&self, name: &str) -> Builder;
    fn build_state(&self, id: BuildId) -> BuildState;
    fn job_of(&self, build: BuildId) -> Option<Job>;
}

impl CatalogAssertions for MemoryCatalog {
    fn builder_named(&self, name: &str) -> Builder {
        self.snapshot()
            .unwrap()
            .builders
            .into_iter()
            .find(|b| b.name == name)
            .unwrap()
    }

    fn build_state(&self, id: BuildId) -> BuildState {
        self.snapshot()
            .unwrap()
            .builds
            .into_iter()
            .find(|b| b.id == id)
            .unwrap()
            .state
    }

    fn job_of(&self, build: BuildId) -> Option<Job> {
        self.job_for_build(build).unwrap()
    }
}

/// Shorthand for a refused connection.
pub fn refused() -> WorkerError {
    WorkerError::Connection("connection refused".to_string())
}
