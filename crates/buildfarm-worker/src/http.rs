//! HTTP transport for the builder RPC protocol.

use async_trait::async_trait;
use buildfarm_core::Builder;
use buildfarm_core::worker::{
    BuildArgs, BuildCookie, BuildReply, BuilderStatus, EnsurePresent, FileMap, ResumeOutput,
    WorkerClient, WorkerConnector, WorkerError, WorkerInfo, WorkerResult,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::wire::{self, RpcReply};

/// Client for one builder.
pub struct HttpWorker {
    client: reqwest::Client,
    base: Url,
    rpc_timeout: Duration,
    resume_timeout: Duration,
}

impl HttpWorker {
    pub fn new(
        client: reqwest::Client,
        base: Url,
        rpc_timeout: Duration,
        resume_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base,
            rpc_timeout,
            resume_timeout,
        }
    }

    fn endpoint(&self) -> WorkerResult<Url> {
        self.base
            .join("rpc")
            .map_err(|e| WorkerError::Protocol(format!("invalid builder url {}: {}", self.base, e)))
    }

    async fn call(&self, method: &str, params: Vec<Value>, timeout: Duration) -> WorkerResult<Value> {
        let endpoint = self.endpoint()?;
        debug!(builder = %self.base, method, "Calling builder");

        let body = json!({ "method": method, "params": params });
        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(WorkerError::Protocol(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;
        reply.into_result()
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> WorkerError {
    if err.is_timeout() {
        WorkerError::Timeout(timeout)
    } else if err.is_decode() {
        WorkerError::Protocol(err.to_string())
    } else {
        WorkerError::Connection(err.to_string())
    }
}

#[async_trait]
impl WorkerClient for HttpWorker {
    async fn info(&self) -> WorkerResult<WorkerInfo> {
        let value = self.call("info", vec![], self.rpc_timeout).await?;
        wire::decode_info(&value)
    }

    async fn status(&self) -> WorkerResult<BuilderStatus> {
        let value = self.call("status", vec![], self.rpc_timeout).await?;
        wire::decode_status(&value)
    }

    async fn ensure_present(
        &self,
        sha1: &str,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> WorkerResult<EnsurePresent> {
        let params = vec![
            json!(sha1),
            json!(url),
            json!(username.unwrap_or_default()),
            json!(password.unwrap_or_default()),
        ];
        let value = self.call("ensurepresent", params, self.rpc_timeout).await?;
        wire::decode_ensure_present(&value)
    }

    async fn build(
        &self,
        cookie: &BuildCookie,
        distro: &str,
        chroot_sha1: &str,
        filemap: &FileMap,
        args: &BuildArgs,
    ) -> WorkerResult<BuildReply> {
        let params = vec![
            json!(cookie.to_string()),
            json!(distro),
            json!(chroot_sha1),
            json!(filemap),
            json!(args),
        ];
        let value = self.call("build", params, self.rpc_timeout).await?;
        wire::decode_build_reply(&value)
    }

    async fn abort(&self) -> WorkerResult<()> {
        self.call("abort", vec![], self.rpc_timeout).await?;
        Ok(())
    }

    async fn clean(&self) -> WorkerResult<()> {
        self.call("clean", vec![], self.rpc_timeout).await?;
        Ok(())
    }

    async fn echo(&self, token: &str) -> WorkerResult<String> {
        let value = self.call("echo", vec![json!(token)], self.rpc_timeout).await?;
        wire::decode_echo(&value)
    }

    async fn resume(&self) -> WorkerResult<ResumeOutput> {
        let value = self.call("resume", vec![], self.resume_timeout).await?;
        wire::decode_resume(&value)
    }
}

/// Opens [`HttpWorker`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    rpc_timeout: Duration,
    resume_timeout: Duration,
}

impl HttpConnector {
    pub fn new(rpc_timeout: Duration, resume_timeout: Duration) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(rpc_timeout)
            .user_agent(concat!("buildfarm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            rpc_timeout,
            resume_timeout,
        })
    }
}

impl WorkerConnector for HttpConnector {
    fn connect(&self, builder: &Builder) -> Arc<dyn WorkerClient> {
        Arc::new(HttpWorker::new(
            self.client.clone(),
            builder.url.clone(),
            self.rpc_timeout,
            self.resume_timeout,
        ))
    }
}
