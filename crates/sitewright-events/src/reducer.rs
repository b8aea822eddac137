//! Pure event handlers: `(current state, frame) -> next state`.
//!
//! The reducer runs synchronously inside the dispatch callback and performs
//! no I/O. Events may arrive out of order or duplicated relative to what the
//! stage machine expects; handlers merge best-effort by stage id and never
//! fail. Terminal transitions are reported back to the caller through
//! [`RunOutcome`] so the shell can latch the run id and fire its completion
//! callback.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::event::{Frame, RunEvent, Severity};
use crate::state::{
    Artifact, ArtifactContent, DriftEvent, LogEntry, PolicyEvent, PolicyEventKind, Recovery,
    RoutingDecision, RunState, RunStatus, Stage, StageStatus, pending_stages, stage_display_name,
};

/// Emitted when a frame moves the run into a terminal status, exactly once
/// per run. The reducer itself has no side effects; the shell consumes this
/// to write the terminal-state latch and invoke the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
}

impl RunState {
    /// Apply one frame. Returns the run outcome when this frame (and not any
    /// earlier one) finished the run.
    pub fn apply(&mut self, frame: &Frame) -> Option<RunOutcome> {
        let ts = frame.timestamp;
        match &frame.event {
            RunEvent::Connected { run_id } => {
                if let Some(id) = frame.run_id.as_ref().or(run_id.as_ref()) {
                    self.run_id = Some(id.clone());
                }
            }
            RunEvent::RunStarted { task } => {
                self.begin_run(task, frame.run_id.as_deref());
            }
            RunEvent::StageStarted { stage_id, agent } => {
                let stage = self.stage_entry(stage_id);
                if !stage.status.is_settled() {
                    stage.status = StageStatus::Running;
                }
                if stage.started_at.is_none() {
                    stage.started_at = ts;
                }
                if let Some(agent) = agent {
                    stage.agent = Some(agent.clone());
                }
            }
            RunEvent::StageCompleted {
                stage_id,
                duration_ms,
                tokens_used,
            } => {
                let stage = self.stage_entry(stage_id);
                // No transition is defined out of failed except recovery.
                if !matches!(stage.status, StageStatus::Failed | StageStatus::Recovered) {
                    stage.status = StageStatus::Completed;
                }
                if stage.completed_at.is_none() {
                    stage.completed_at = ts;
                }
                if let Some(d) = duration_ms {
                    stage.duration_ms = Some(*d);
                }
                if let Some(t) = tokens_used {
                    stage.tokens = Some(*t);
                }
            }
            RunEvent::StageFailed { stage_id, error } => {
                let stage = self.stage_entry(stage_id);
                if !matches!(stage.status, StageStatus::Completed | StageStatus::Recovered) {
                    stage.status = StageStatus::Failed;
                }
                if let Some(err) = error {
                    stage.error = Some(err.clone());
                }
            }
            RunEvent::Log {
                stage_id,
                agent,
                message,
                level,
            } => {
                self.push_log(stage_id.clone(), agent.clone(), message.clone(), *level, ts);
            }
            RunEvent::RoutingDecision {
                stage_id,
                selected_agent,
                reason,
            } => {
                self.routing_decisions.push(RoutingDecision {
                    stage_id: stage_id.clone(),
                    selected_agent: selected_agent.clone(),
                    reason: reason.clone(),
                    timestamp: ts,
                });
                self.stage_entry(stage_id).agent = Some(selected_agent.clone());
            }
            RunEvent::PolicyCheck {
                stage_id,
                passed,
                policy,
                detail,
            } => {
                self.policy_events.push(PolicyEvent {
                    stage_id: stage_id.clone(),
                    kind: PolicyEventKind::Check,
                    passed: Some(*passed),
                    policy: policy.clone(),
                    detail: detail.clone(),
                    timestamp: ts,
                });
                self.stage_entry(stage_id).policy_passed = Some(*passed);
            }
            RunEvent::PolicyViolation {
                stage_id,
                policy,
                detail,
            } => {
                // Informational only; the stage flag reflects the most recent
                // check, not violations.
                self.policy_events.push(PolicyEvent {
                    stage_id: stage_id.clone(),
                    kind: PolicyEventKind::Violation,
                    passed: None,
                    policy: policy.clone(),
                    detail: detail.clone(),
                    timestamp: ts,
                });
            }
            RunEvent::DriftDetected {
                stage_id,
                score,
                threshold,
                detail,
            } => {
                self.drift_events.push(DriftEvent {
                    stage_id: stage_id.clone(),
                    score: *score,
                    threshold: *threshold,
                    detail: detail.clone(),
                    timestamp: ts,
                });
                self.stage_entry(stage_id).drift_score = Some(*score);
            }
            RunEvent::FailureDetected {
                stage_id,
                pattern,
                detail,
            } => {
                let what = pattern
                    .as_deref()
                    .or(detail.as_deref())
                    .unwrap_or("unknown pattern");
                self.push_log(
                    stage_id.clone(),
                    None,
                    format!("Failure detected: {what}"),
                    Severity::Warning,
                    ts,
                );
            }
            RunEvent::RecoveryStarted { stage_id, action } => {
                let message = match action {
                    Some(action) => format!("Recovery started: {action}"),
                    None => "Recovery started".to_string(),
                };
                self.push_log(stage_id.clone(), None, message, Severity::Info, ts);
            }
            RunEvent::RecoveryCompleted { stage_id, action } => {
                self.recoveries.push(Recovery {
                    stage: stage_id.clone(),
                    recovery: action.clone(),
                });
                let stage = self.stage_entry(stage_id);
                if stage.status == StageStatus::Failed {
                    stage.status = StageStatus::Recovered;
                }
            }
            RunEvent::ArtifactCreated {
                artifact_name,
                artifact_type,
                stage_id,
                content,
            } => {
                self.artifacts.push(Artifact {
                    name: artifact_name.clone(),
                    artifact_type: artifact_type.clone(),
                    stage_id: stage_id.clone(),
                });
                if let Some(content) = content {
                    self.artifact_contents.insert(
                        format!("{artifact_name}.{artifact_type}"),
                        ArtifactContent {
                            name: artifact_name.clone(),
                            artifact_type: artifact_type.clone(),
                            content: content.clone(),
                        },
                    );
                }
            }
            RunEvent::RunCompleted {
                total_tokens,
                total_latency_ms,
                replay_token,
            } => {
                if let Some(t) = total_tokens {
                    self.total_tokens = *t;
                }
                if let Some(l) = total_latency_ms {
                    self.total_latency_ms = *l;
                }
                if replay_token.is_some() {
                    self.replay_token = replay_token.clone();
                }
                if !self.status.is_terminal() {
                    self.status = RunStatus::Completed;
                    return Some(RunOutcome { success: true });
                }
            }
            RunEvent::RunFailed {
                error,
                total_tokens,
                total_latency_ms,
            } => {
                if let Some(err) = error {
                    self.error = Some(err.clone());
                }
                if let Some(t) = total_tokens {
                    self.total_tokens = *t;
                }
                if let Some(l) = total_latency_ms {
                    self.total_latency_ms = *l;
                }
                if !self.status.is_terminal() {
                    self.status = RunStatus::Failed;
                    return Some(RunOutcome { success: false });
                }
            }
            RunEvent::StreamEnd { .. } => {
                // Producer is about to close the transport; close handling
                // lives with the connection owner.
            }
            RunEvent::Unknown => {
                debug!(target: "reducer", "ignoring unrecognized event type");
            }
        }
        None
    }

    /// The one true "begin accumulating" signal. Subscribing alone does not
    /// reset anything; this does.
    fn begin_run(&mut self, task: &str, run_id: Option<&str>) {
        if let Some(id) = run_id {
            self.run_id = Some(id.to_string());
        }
        self.status = RunStatus::Running;
        self.task = task.to_string();
        self.stages = pending_stages();
        self.logs.clear();
        self.routing_decisions.clear();
        self.policy_events.clear();
        self.drift_events.clear();
        self.artifacts.clear();
        self.artifact_contents.clear();
        self.recoveries.clear();
        self.total_tokens = 0;
        self.total_latency_ms = 0;
        self.error = None;
        self.replay_token = None;
    }

    /// Look up a stage by id, creating it on the fly for ids the pipeline
    /// constant does not know. Keeps every stage-targeted handler total.
    fn stage_entry(&mut self, id: &str) -> &mut Stage {
        let idx = match self.stages.iter().position(|s| s.id == id) {
            Some(idx) => idx,
            None => {
                self.stages.push(Stage::pending(id, stage_display_name(id)));
                self.stages.len() - 1
            }
        };
        &mut self.stages[idx]
    }

    fn push_log(
        &mut self,
        stage_id: Option<String>,
        agent: Option<String>,
        message: String,
        level: Severity,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.logs.push(LogEntry {
            stage_id,
            agent,
            message,
            level,
            timestamp,
        });
    }
}
