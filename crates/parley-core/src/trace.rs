use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TraceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Orchestration,
    PreProcessing,
    PostProcessing,
    Action,
    KnowledgeBase,
    Collaborator,
    Guardrail,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

/// One normalized unit of agent work.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(rename = "stepIndex")]
    pub index: u32,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "duration", default)]
    pub duration_ms: i64,
}

impl Step {
    /// Steps with an empty action are non-events and never reach a trace.
    pub fn is_empty(&self) -> bool {
        self.action.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.status == StepStatus::Running
    }

    /// Move a running step to its terminal status, ending it at `at`.
    /// Returns false if the step was already finalized, in which case
    /// nothing changes.
    pub fn finalize(&mut self, status: StepStatus, at: DateTime<Utc>) -> bool {
        if !self.is_running() || status == StepStatus::Running {
            return false;
        }
        self.status = status;
        self.end_time = Some(at);
        self.duration_ms = (at - self.start_time).num_milliseconds();
        true
    }
}

/// Terminal error attached to a trace (and to the outbound `error` event).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Per-assistant-turn diagnostic bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_id: TraceId,
    #[serde(rename = "agentSteps")]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self {
            trace_id: TraceId::new(),
            steps: Vec::new(),
            error: None,
        }
    }

    /// Index the next accepted step will receive.
    pub fn next_index(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Append a step, assigning its index. Empty steps are dropped and
    /// `None` is returned.
    pub fn push(&mut self, mut step: Step) -> Option<&Step> {
        if step.is_empty() {
            return None;
        }
        step.index = self.next_index();
        self.steps.push(step);
        self.steps.last()
    }

    /// Finalize every still-running step as successful.
    pub fn settle(&mut self, at: DateTime<Utc>) -> usize {
        self.steps
            .iter_mut()
            .filter_map(|s| s.finalize(StepStatus::Success, at).then_some(()))
            .count()
    }

    pub fn fail(&mut self, error: ErrorInfo) {
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &str, status: StepStatus) -> Step {
        Step {
            index: 0,
            agent_name: "Main Agent".into(),
            agent_id: String::new(),
            kind: StepKind::Orchestration,
            action: action.into(),
            status,
            rationale: None,
            observation: None,
            input: None,
            output: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn push_assigns_monotonic_indexes() {
        let mut trace = Trace::new();
        trace.push(step("Thinking", StepStatus::Success));
        trace.push(step("Processing request", StepStatus::Success));
        let idx: Vec<u32> = trace.steps.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![1, 2]);
    }

    #[test]
    fn push_drops_empty_action() {
        let mut trace = Trace::new();
        assert!(trace.push(step("", StepStatus::Success)).is_none());
        trace.push(step("Thinking", StepStatus::Success));
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].index, 1);
    }

    #[test]
    fn settle_finalizes_only_running_steps() {
        let mut trace = Trace::new();
        trace.push(step("Calling", StepStatus::Running));
        trace.push(step("Failed", StepStatus::Error));
        let at = trace.steps[0].start_time + chrono::Duration::milliseconds(1500);
        assert_eq!(trace.settle(at), 1);
        assert_eq!(trace.steps[0].status, StepStatus::Success);
        assert_eq!(trace.steps[0].end_time, Some(at));
        assert_eq!(trace.steps[0].duration_ms, 1500);
        assert_eq!(trace.steps[1].status, StepStatus::Error);
        assert_eq!(trace.steps[1].duration_ms, 0);
    }

    #[test]
    fn finalized_step_is_not_mutated_again() {
        let mut s = step("Calling", StepStatus::Running);
        assert!(s.finalize(StepStatus::Error, Utc::now()));
        let end = s.end_time;
        assert!(!s.finalize(StepStatus::Success, Utc::now()));
        assert_eq!(s.status, StepStatus::Error);
        assert_eq!(s.end_time, end);
    }

    #[test]
    fn wire_field_names() {
        let mut trace = Trace::new();
        trace.push(step("Thinking", StepStatus::Success));
        let json = serde_json::to_value(&trace).unwrap();
        let s = &json["agentSteps"][0];
        assert_eq!(s["stepIndex"], 1);
        assert_eq!(s["type"], "orchestration");
        assert_eq!(s["status"], "success");
        assert!(json.get("traceId").is_some());
        assert!(json.get("error").is_none());
    }
}
