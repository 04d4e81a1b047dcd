use chrono::{DateTime, Utc};

use parley_core::errors::AgentError;
use parley_core::fragments::{
    InvocationInput, Observation, OrchestrationPart, PostProcessingPart, PreProcessingPart,
    TraceBody, TraceFragment,
};
use parley_core::trace::{Step, StepKind, StepStatus};

use crate::truncate::{truncate, DETAIL_LIMIT, RESPONSE_LIMIT};

const KNOWLEDGE_BASE_AGENT: &str = "Knowledge Base";

/// Maps raw agent trace fragments onto [`Step`]s.
///
/// Stateless apart from the main agent's identity: the caller supplies the
/// running step index and the fragment's arrival time. Fragments that carry
/// nothing displayable come back with an empty `action` and must be dropped.
#[derive(Clone, Debug)]
pub struct TraceNormalizer {
    agent_name: String,
    agent_id: String,
}

impl TraceNormalizer {
    pub fn new(agent_name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn normalize(&self, index: u32, fragment: &TraceFragment, started_at: DateTime<Utc>) -> Step {
        self.normalize_at(index, fragment, started_at, Utc::now())
    }

    fn normalize_at(
        &self,
        index: u32,
        fragment: &TraceFragment,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Step {
        let agent_name = fragment
            .collaborator_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(self.agent_name.as_str());
        let mut step = self.base_step(index, agent_name, started_at, finished_at);

        match &fragment.trace {
            TraceBody::PreProcessing { part } => {
                step.kind = StepKind::PreProcessing;
                step.action = "Analyzing input".into();
                apply_pre_processing(&mut step, part);
            }
            TraceBody::Orchestration { part } => apply_orchestration(&mut step, part),
            TraceBody::PostProcessing { part } => {
                step.kind = StepKind::PostProcessing;
                step.action = "Formatting response".into();
                if let PostProcessingPart::ModelOutput { text: Some(text) } = part {
                    step.output = Some(truncate(text, RESPONSE_LIMIT));
                }
            }
            TraceBody::Failure { failure_reason } => {
                step.kind = StepKind::Error;
                step.status = StepStatus::Error;
                step.action = failure_reason.clone().unwrap_or_default();
            }
            TraceBody::Guardrail => {
                step.kind = StepKind::Guardrail;
                step.action = "Content check".into();
            }
            TraceBody::Unknown => {}
        }

        step
    }

    /// Error step for a failure reported mid-stream by the agent transport.
    pub fn stream_error(&self, index: u32, error: &AgentError, started_at: DateTime<Utc>) -> Step {
        let mut step = self.base_step(index, &self.agent_name, started_at, Utc::now());
        step.kind = StepKind::Error;
        step.status = StepStatus::Error;
        step.action = error.to_string();
        step
    }

    fn base_step(
        &self,
        index: u32,
        agent_name: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Step {
        Step {
            index,
            agent_name: agent_name.to_owned(),
            agent_id: self.agent_id.clone(),
            kind: StepKind::Orchestration,
            action: String::new(),
            status: StepStatus::Success,
            rationale: None,
            observation: None,
            input: None,
            output: None,
            start_time: started_at,
            end_time: Some(finished_at),
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }
}

fn apply_pre_processing(step: &mut Step, part: &PreProcessingPart) {
    match part {
        PreProcessingPart::ModelInput { text: Some(text) } => {
            step.input = Some(truncate(text, DETAIL_LIMIT));
        }
        PreProcessingPart::ModelOutput { rationale: Some(rationale) } => {
            step.rationale = Some(rationale.clone());
        }
        _ => {}
    }
}

fn apply_orchestration(step: &mut Step, part: &OrchestrationPart) {
    match part {
        OrchestrationPart::ModelInput { text } => {
            step.action = "Processing request".into();
            step.input = text.as_deref().map(|t| truncate(t, DETAIL_LIMIT));
        }
        OrchestrationPart::Rationale { text } => {
            step.action = "Thinking".into();
            step.rationale = text.clone();
        }
        OrchestrationPart::Invocation(input) => apply_invocation(step, input),
        OrchestrationPart::Observation(observation) => apply_observation(step, observation),
        OrchestrationPart::ModelOutput => step.action = "Response generated".into(),
        OrchestrationPart::Unknown => {}
    }
}

fn apply_invocation(step: &mut Step, input: &InvocationInput) {
    if let Some(call) = &input.collaborator {
        step.kind = StepKind::Collaborator;
        step.status = StepStatus::Running;
        if let Some(name) = &call.name {
            step.agent_name = name.clone();
        }
        step.action = "Calling".into();
        step.input = call.input.clone();
    }

    if let Some(call) = &input.action_group {
        step.kind = StepKind::Action;
        if let Some(name) = &call.name {
            step.agent_name = name.clone();
        }
        step.action = match (&call.function, &call.api_path) {
            (Some(function), _) => format!("Function: {function}"),
            (None, Some(path)) => format!("API: {path}"),
            (None, None) => "Executing".into(),
        };
    }

    if let Some(lookup) = &input.knowledge_base {
        step.kind = StepKind::KnowledgeBase;
        step.agent_name = KNOWLEDGE_BASE_AGENT.into();
        step.action = "Searching".into();
        if let Some(text) = &lookup.text {
            step.input = Some(text.clone());
        }
        if let Some(id) = &lookup.knowledge_base_id {
            step.agent_id = id.clone();
        }
    }
}

fn apply_observation(step: &mut Step, observation: &Observation) {
    if let Some(out) = &observation.collaborator {
        step.kind = StepKind::Collaborator;
        if let Some(name) = &out.name {
            step.agent_name = name.clone();
        }
        step.action = "Response".into();
        step.output = out.output.clone();
    }

    if let Some(out) = &observation.knowledge_base {
        step.kind = StepKind::KnowledgeBase;
        step.agent_name = KNOWLEDGE_BASE_AGENT.into();
        step.action = "Results".into();
        if let Some(refs) = &out.retrieved_references {
            step.observation = Some(format!("Found {} references", refs.len()));
        }
    }

    if let Some(text) = observation.action_group.as_ref().and_then(|o| o.text.as_deref()) {
        step.kind = StepKind::Action;
        step.action = "Completed".into();
        step.output = Some(truncate(text, DETAIL_LIMIT));
    }

    if let Some(text) = observation.final_response.as_ref().and_then(|f| f.text.as_deref()) {
        step.action = "Final response".into();
        step.output = Some(truncate(text, RESPONSE_LIMIT));
    }
}
