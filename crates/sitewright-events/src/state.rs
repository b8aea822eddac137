//! The reduced, render-ready view of a run.
//!
//! `RunState` is exclusively owned by the stream consumer; render layers and
//! callbacks only ever see snapshots. Everything here serializes so a
//! snapshot can cross an FFI or JSON boundary untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Severity;

/// The fixed pipeline every run moves through, in order. Stage ids are a
/// configuration constant shared with the backend, not derived from the
/// stream.
pub const PIPELINE_STAGES: [(&str, &str); 8] = [
    ("preflight", "Preflight"),
    ("research", "Research"),
    ("strategy", "Strategy"),
    ("copy", "Copy"),
    ("ux", "UX"),
    ("consistency", "Consistency"),
    ("recovery", "Recovery"),
    ("bundle", "Bundle"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Terminal means no further progress events are expected for this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Recovered,
}

impl StageStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Recovered)
    }
}

/// One named step of the pipeline. Mutated in place by lifecycle events,
/// never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    /// Assigned by a routing decision, before or after the stage starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Stage {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            tokens: None,
            agent: None,
            policy_passed: None,
            drift_score: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage_id: Option<String>,
    pub agent: Option<String>,
    pub message: String,
    pub level: Severity,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub stage_id: String,
    pub selected_agent: String,
    pub reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEventKind {
    Check,
    Violation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvent {
    pub stage_id: String,
    pub kind: PolicyEventKind,
    /// Present for checks only; violations are informational.
    pub passed: Option<bool>,
    pub policy: Option<String>,
    pub detail: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub stage_id: String,
    pub score: f64,
    pub threshold: Option<f64>,
    pub detail: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub artifact_type: String,
    pub stage_id: Option<String>,
}

/// Full inline payload of an artifact, keyed in `RunState::artifact_contents`
/// by `"{name}.{artifact_type}"`. Artifacts delivered without inline content
/// appear in the artifact list only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContent {
    pub name: String,
    pub artifact_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub stage: String,
    pub recovery: String,
}

/// The full reduced view of the currently tracked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub task: String,
    pub stages: Vec<Stage>,
    pub logs: Vec<LogEntry>,
    pub routing_decisions: Vec<RoutingDecision>,
    pub policy_events: Vec<PolicyEvent>,
    pub drift_events: Vec<DriftEvent>,
    pub artifacts: Vec<Artifact>,
    pub artifact_contents: HashMap<String, ArtifactContent>,
    pub recoveries: Vec<Recovery>,
    pub total_tokens: u64,
    pub total_latency_ms: u64,
    pub error: Option<String>,
    pub replay_token: Option<String>,
}

impl RunState {
    /// The initial idle shape: no run, every pipeline stage pending.
    pub fn new() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            task: String::new(),
            stages: pending_stages(),
            logs: Vec::new(),
            routing_decisions: Vec::new(),
            policy_events: Vec::new(),
            drift_events: Vec::new(),
            artifacts: Vec::new(),
            artifact_contents: HashMap::new(),
            recoveries: Vec::new(),
            total_tokens: 0,
            total_latency_ms: 0,
            error: None,
            replay_token: None,
        }
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn pending_stages() -> Vec<Stage> {
    PIPELINE_STAGES
        .iter()
        .map(|(id, name)| Stage::pending(*id, *name))
        .collect()
}

pub(crate) fn stage_display_name(id: &str) -> String {
    PIPELINE_STAGES
        .iter()
        .find(|(known, _)| *known == id)
        .map_or_else(|| id.to_string(), |(_, name)| (*name).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_idle_with_pending_pipeline() {
        let state = RunState::new();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.stages.len(), PIPELINE_STAGES.len());
        assert!(state.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(state.stages[0].id, "preflight");
        assert_eq!(state.stages[7].id, "bundle");
    }

    #[test]
    fn test_status_terminality() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let state = RunState::new();
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
