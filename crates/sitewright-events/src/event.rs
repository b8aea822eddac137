//! Typed model for frames delivered over a run's event stream.
//!
//! Each SSE data payload is one JSON frame: a `type` tag, the `run_id` and
//! `timestamp` envelope fields, and a `data` object whose shape depends on
//! the tag. Unrecognized tags parse to [`RunEvent::Unknown`] so producers can
//! add event types without breaking deployed consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One frame off the run event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub event: RunEvent,
}

impl Frame {
    /// Parse a single SSE data payload into a typed frame.
    ///
    /// Callers are expected to drop (not propagate) parse failures: a
    /// malformed frame must never take the consumer down.
    pub fn parse(data: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Severity attached to log entries. Missing severity means `info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    Connected {
        #[serde(default)]
        run_id: Option<String>,
    },
    RunStarted {
        #[serde(default)]
        task: String,
    },
    StageStarted {
        stage_id: String,
        #[serde(default)]
        agent: Option<String>,
    },
    StageCompleted {
        stage_id: String,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        tokens_used: Option<u64>,
    },
    StageFailed {
        stage_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Log {
        #[serde(default)]
        stage_id: Option<String>,
        #[serde(default)]
        agent: Option<String>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        level: Severity,
    },
    RoutingDecision {
        stage_id: String,
        selected_agent: String,
        #[serde(default)]
        reason: Option<String>,
    },
    PolicyCheck {
        stage_id: String,
        passed: bool,
        #[serde(default)]
        policy: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
    PolicyViolation {
        stage_id: String,
        #[serde(default)]
        policy: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
    DriftDetected {
        stage_id: String,
        score: f64,
        #[serde(default)]
        threshold: Option<f64>,
        #[serde(default)]
        detail: Option<String>,
    },
    FailureDetected {
        #[serde(default)]
        stage_id: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
    RecoveryStarted {
        #[serde(default)]
        stage_id: Option<String>,
        #[serde(default)]
        action: Option<String>,
    },
    RecoveryCompleted {
        stage_id: String,
        #[serde(default)]
        action: String,
    },
    ArtifactCreated {
        artifact_name: String,
        artifact_type: String,
        #[serde(default)]
        stage_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    RunCompleted {
        #[serde(default)]
        total_tokens: Option<u64>,
        #[serde(default)]
        total_latency_ms: Option<u64>,
        #[serde(default)]
        replay_token: Option<String>,
    },
    RunFailed {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        total_tokens: Option<u64>,
        #[serde(default)]
        total_latency_ms: Option<u64>,
    },
    StreamEnd {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Any event type this build does not recognize. Ignored by the reducer.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stage_started_frame() {
        let raw = r#"{
            "type": "stage_started",
            "run_id": "r1",
            "timestamp": "2025-03-01T12:00:00Z",
            "data": {"stage_id": "preflight"}
        }"#;
        let frame = Frame::parse(raw).unwrap();
        assert_eq!(frame.run_id.as_deref(), Some("r1"));
        match frame.event {
            RunEvent::StageStarted { stage_id, agent } => {
                assert_eq!(stage_id, "preflight");
                assert!(agent.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_parses() {
        let raw = r#"{"type": "quota_warning", "run_id": "r1", "data": {"remaining": 3}}"#;
        let frame = Frame::parse(raw).unwrap();
        assert!(matches!(frame.event, RunEvent::Unknown));
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(Frame::parse("not json at all").is_err());
        assert!(Frame::parse(r#"{"type": "stage_started", "data": {}}"#).is_err());
    }

    #[test]
    fn test_log_severity_defaults_to_info() {
        let raw = r#"{"type": "log", "data": {"message": "hello"}}"#;
        let frame = Frame::parse(raw).unwrap();
        match frame.event {
            RunEvent::Log { level, message, .. } => {
                assert_eq!(level, Severity::Info);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_run_completed_totals_optional() {
        let raw = r#"{"type": "run_completed", "data": {}}"#;
        let frame = Frame::parse(raw).unwrap();
        match frame.event {
            RunEvent::RunCompleted {
                total_tokens,
                total_latency_ms,
                replay_token,
            } => {
                assert!(total_tokens.is_none());
                assert!(total_latency_ms.is_none());
                assert!(replay_token.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
