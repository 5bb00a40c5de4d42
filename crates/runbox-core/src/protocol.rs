//! Wire protocol between the run client and the remote job runner.
//!
//! Every frame is one JSON object tagged by its `type` field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timeout sent with `start_job` when the caller does not pick one (5 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Job identifier assigned by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Command from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Run `code` written in `language`.
    StartJob {
        language: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Feed text to the running job's stdin.
    Stdin { job_id: JobId, input: String },
}

impl ClientCommand {
    /// Create a `start_job` command with the default timeout.
    #[must_use]
    pub fn start_job(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self::StartJob {
            language: language.into(),
            code: code.into(),
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Create a `stdin` command.
    #[must_use]
    pub fn stdin(job_id: JobId, input: impl Into<String>) -> Self {
        Self::Stdin {
            job_id,
            input: input.into(),
        }
    }

    /// Replace the timeout of a `start_job` command. No effect on `stdin`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        if let Self::StartJob { timeout_ms, .. } = &mut self {
            *timeout_ms = Some(timeout);
        }
        self
    }

    /// Wire tag of this command.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartJob { .. } => "start_job",
            Self::Stdin { .. } => "stdin",
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Chunk of the job's standard output.
    Stdout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        chunk: String,
    },
    /// Chunk of the job's standard error.
    Stderr {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        chunk: String,
    },
    /// The runner accepted `start_job` and assigned an id.
    JobStarted { job_id: JobId },
    /// The job exited.
    JobFinished {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        killed_by_timeout: Option<bool>,
    },
    /// The job could not be run or crashed in the runner.
    JobError { message: String },
    /// Runner diagnostic.
    Log { message: String },
    /// The job is blocked reading stdin.
    NeedsInput { job_id: JobId },
}

impl ServerMessage {
    /// Every `type` tag this client understands.
    pub const KINDS: &'static [&'static str] = &[
        "stdout",
        "stderr",
        "job_started",
        "job_finished",
        "job_error",
        "log",
        "needs_input",
    ];

    /// Wire tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::JobStarted { .. } => "job_started",
            Self::JobFinished { .. } => "job_finished",
            Self::JobError { .. } => "job_error",
            Self::Log { .. } => "log",
            Self::NeedsInput { .. } => "needs_input",
        }
    }
}

/// Codec error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Frame is not a JSON object: {0}")]
    NotAnObject(String),
    #[error("Frame has no string `type` field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid `{kind}` message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound command as a single text frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode(command: &ClientCommand) -> Result<String, CodecError> {
    Ok(serde_json::to_string(command)?)
}

/// Decode and validate one inbound text frame.
///
/// # Errors
/// Returns error if the frame is not JSON, carries no or an unknown `type`,
/// or its fields do not match the tagged variant.
pub fn decode(frame: &str) -> Result<ServerMessage, CodecError> {
    let value: Value = serde_json::from_str(frame)?;
    let Value::Object(ref object) = value else {
        return Err(CodecError::NotAnObject(truncate(frame)));
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?;

    if !ServerMessage::KINDS.contains(&kind) {
        return Err(CodecError::UnknownType(kind.to_string()));
    }
    let kind = kind.to_string();

    serde_json::from_value(value).map_err(|source| CodecError::InvalidFields { kind, source })
}

fn truncate(frame: &str) -> String {
    const MAX: usize = 64;
    match frame.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_job_wire_shape() {
        let json = encode(&ClientCommand::start_job("python", "print(1)")).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "start_job");
        assert_eq!(value["language"], "python");
        assert_eq!(value["code"], "print(1)");
        assert_eq!(value["timeoutMs"], 300_000);
    }

    #[test]
    fn test_start_job_without_timeout_omits_field() {
        let cmd = ClientCommand::StartJob {
            language: "go".into(),
            code: String::new(),
            timeout_ms: None,
        };
        let json = encode(&cmd).unwrap();
        assert!(!json.contains("timeoutMs"));
    }

    #[test]
    fn test_stdin_wire_shape() {
        let json = encode(&ClientCommand::stdin(JobId::from("j1"), "x\n")).unwrap();
        assert_eq!(json, r#"{"type":"stdin","jobId":"j1","input":"x\n"}"#);
    }

    #[test]
    fn test_with_timeout_only_touches_start_job() {
        let cmd = ClientCommand::start_job("c", "int main(){}").with_timeout(1_000);
        assert!(matches!(cmd, ClientCommand::StartJob { timeout_ms: Some(1_000), .. }));

        let stdin = ClientCommand::stdin("j".into(), "a").with_timeout(1_000);
        assert_eq!(stdin, ClientCommand::stdin("j".into(), "a"));
    }

    #[test]
    fn test_decode_job_finished() {
        let msg = decode(r#"{"type":"job_finished","jobId":"j1","exitCode":0}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::JobFinished {
                job_id: "j1".into(),
                exit_code: Some(0),
                killed_by_timeout: None,
            }
        );

        let msg =
            decode(r#"{"type":"job_finished","jobId":"j2","killedByTimeout":true}"#).unwrap();
        assert!(matches!(
            msg,
            ServerMessage::JobFinished { exit_code: None, killed_by_timeout: Some(true), .. }
        ));
    }

    #[test]
    fn test_decode_stdout_with_and_without_job_id() {
        let msg = decode(r#"{"type":"stdout","chunk":"1\n"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Stdout {
                job_id: None,
                chunk: "1\n".into(),
            }
        );

        let msg = decode(r#"{"type":"stderr","jobId":"j1","chunk":"oops"}"#).unwrap();
        assert_eq!(msg.kind(), "stderr");
    }

    #[test]
    fn test_decode_advisory_messages() {
        assert_eq!(
            decode(r#"{"type":"needs_input","jobId":"j1"}"#).unwrap(),
            ServerMessage::NeedsInput {
                job_id: "j1".into()
            }
        );
        assert_eq!(
            decode(r#"{"type":"log","message":"queued"}"#).unwrap(),
            ServerMessage::Log {
                message: "queued".into()
            }
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = decode(r#"{"type":"job_started","jobId":"j1","host":"runner-3"}"#).unwrap();
        assert_eq!(msg, ServerMessage::JobStarted { job_id: "j1".into() });
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(decode("[1,2]"), Err(CodecError::NotAnObject(_))));
        assert!(matches!(decode(r#"{"chunk":"x"}"#), Err(CodecError::MissingType)));
        assert!(matches!(
            decode(r#"{"type":"job_paused","jobId":"j1"}"#),
            Err(CodecError::UnknownType(kind)) if kind == "job_paused"
        ));
        assert!(matches!(
            decode(r#"{"type":"job_started"}"#),
            Err(CodecError::InvalidFields { kind, .. }) if kind == "job_started"
        ));
    }

    #[test]
    fn test_kinds_cover_every_variant() {
        let samples = [
            ServerMessage::Stdout {
                job_id: None,
                chunk: String::new(),
            },
            ServerMessage::Stderr {
                job_id: None,
                chunk: String::new(),
            },
            ServerMessage::JobStarted { job_id: "j".into() },
            ServerMessage::JobFinished {
                job_id: "j".into(),
                exit_code: None,
                killed_by_timeout: None,
            },
            ServerMessage::JobError {
                message: String::new(),
            },
            ServerMessage::Log {
                message: String::new(),
            },
            ServerMessage::NeedsInput { job_id: "j".into() },
        ];
        for msg in samples {
            assert!(ServerMessage::KINDS.contains(&msg.kind()));
        }
    }
}
