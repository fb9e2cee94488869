//! Builder RPC client for the buildfarm scheduler.
//!
//! Builders speak a small JSON-RPC dialect over HTTP:
//! `POST <builder url>/rpc` with `{"method": ..., "params": [...]}`,
//! answered by `{"result": ...}` or `{"fault": {"code": ..., "message": ...}}`.
//! Replies are tuples; [`wire`] decodes them into protocol types.

pub mod http;
pub mod wire;

pub use buildfarm_core::worker::{
    BuildArgs, BuildCookie, BuildOutcome, BuildReply, BuilderStatus, EnsurePresent, FileMap,
    PROTOCOL_VERSION, ResumeOutput, WorkerClient, WorkerConnector, WorkerError, WorkerInfo,
    WorkerResult,
};
pub use http::{HttpConnector, HttpWorker};
