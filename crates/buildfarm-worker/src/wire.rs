//! Decoding of RPC reply tuples.

use buildfarm_core::worker::{
    BuildOutcome, BuildReply, BuilderStatus, EnsurePresent, FileMap, ResumeOutput, WorkerError,
    WorkerInfo, WorkerResult,
};
use serde::Deserialize;
use serde_json::Value;

/// Fault body of a failed call.
#[derive(Debug, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
}

/// Envelope of every reply.
#[derive(Debug, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub fault: Option<RpcFault>,
}

impl RpcReply {
    pub fn into_result(self) -> WorkerResult<Value> {
        match self.fault {
            Some(fault) => Err(WorkerError::Fault {
                code: fault.code,
                message: fault.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn protocol(msg: impl Into<String>) -> WorkerError {
    WorkerError::Protocol(msg.into())
}

fn as_tuple<'a>(value: &'a Value, method: &str) -> WorkerResult<&'a [Value]> {
    value
        .as_array()
        .map(|v| v.as_slice())
        .ok_or_else(|| protocol(format!("{} reply is not a tuple: {}", method, value)))
}

fn string_at(tuple: &[Value], idx: usize, method: &str) -> WorkerResult<String> {
    tuple
        .get(idx)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| protocol(format!("{} reply field {} is not a string", method, idx)))
}

pub fn decode_info(value: &Value) -> WorkerResult<WorkerInfo> {
    let tuple = as_tuple(value, "info")?;
    let mechanisms = match tuple.get(2) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|m| m.as_str())
            .map(|m| m.to_string())
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => return Err(protocol(format!("info mechanisms malformed: {}", other))),
    };
    Ok(WorkerInfo {
        protocol_version: string_at(tuple, 0, "info")?,
        arch_tag: string_at(tuple, 1, "info")?,
        mechanisms,
    })
}

/// Decode a status sentence.
///
/// - `["idle"]`
/// - `["building", cookie, logtail]`
/// - `["waiting", outcome, cookie, filemap?, dependencies?]`
pub fn decode_status(value: &Value) -> WorkerResult<BuilderStatus> {
    let tuple = as_tuple(value, "status")?;
    let state = string_at(tuple, 0, "status")?;

    match state.as_str() {
        "idle" => Ok(BuilderStatus::Idle),
        "building" => Ok(BuilderStatus::Building {
            cookie: string_at(tuple, 1, "status")?,
            logtail: tuple
                .get(2)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "waiting" => {
            let outcome = tuple
                .get(1)
                .cloned()
                .ok_or_else(|| protocol("waiting status without outcome"))?;
            let outcome: BuildOutcome = serde_json::from_value(outcome)
                .map_err(|e| protocol(format!("unknown build outcome: {}", e)))?;
            let filemap: FileMap = match tuple.get(3) {
                Some(Value::Null) | None => FileMap::new(),
                Some(map) => serde_json::from_value(map.clone())
                    .map_err(|e| protocol(format!("malformed filemap: {}", e)))?,
            };
            let dependencies = tuple
                .get(4)
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.to_string());
            Ok(BuilderStatus::Waiting {
                cookie: string_at(tuple, 2, "status")?,
                outcome,
                filemap,
                dependencies,
            })
        }
        other => Err(protocol(format!("unknown builder status: {}", other))),
    }
}

pub fn decode_ensure_present(value: &Value) -> WorkerResult<EnsurePresent> {
    let tuple = as_tuple(value, "ensurepresent")?;
    let present = tuple
        .first()
        .and_then(|v| v.as_bool())
        .ok_or_else(|| protocol("ensurepresent reply has no presence flag"))?;
    Ok(EnsurePresent {
        present,
        info: tuple
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn decode_build_reply(value: &Value) -> WorkerResult<BuildReply> {
    let tuple = as_tuple(value, "build")?;
    Ok(BuildReply {
        status: string_at(tuple, 0, "build")?,
        info: tuple
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn decode_resume(value: &Value) -> WorkerResult<ResumeOutput> {
    let tuple = as_tuple(value, "resume")?;
    let exit_code = tuple
        .get(2)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| protocol("resume reply has no exit code"))?;
    Ok(ResumeOutput {
        stdout: string_at(tuple, 0, "resume")?,
        stderr: string_at(tuple, 1, "resume")?,
        exit_code: i32::try_from(exit_code)
            .map_err(|_| protocol(format!("resume exit code out of range: {}", exit_code)))?,
    })
}

pub fn decode_echo(value: &Value) -> WorkerResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Array(items) => string_at(items, 0, "echo"),
        other => Err(protocol(format!("echo reply malformed: {}", other))),
    }
}
