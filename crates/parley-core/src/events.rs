use serde::{Deserialize, Serialize};

use crate::ids::{ExternalSessionId, MessageId, TraceId};
use crate::trace::{ErrorInfo, Step, StepKind, StepStatus, Trace};

/// Text attached to the `summarized` notice.
pub const SUMMARIZED_MESSAGE: &str =
    "Conversation history was automatically summarized to reduce context length";

/// Events delivered to the client during a turn, in causal order:
/// `thinking`, optional `summarized`, interleaved `content` / `agent_step`,
/// settle-pass `agent_step`s, `trace`, `done`. `error` replaces the content
/// phase when the agent cannot be invoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    Thinking {
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    Summarized {
        message: String,
        new_session_id: ExternalSessionId,
        session_rotated: bool,
    },
    Content {
        chunk: String,
    },
    AgentStep(StepEvent),
    #[serde(rename_all = "camelCase")]
    Trace {
        trace_id: TraceId,
        agent_steps: Vec<Step>,
    },
    Error(ErrorInfo),
    #[serde(rename_all = "camelCase")]
    Done {
        /// Empty when no assistant message was persisted.
        message_id: String,
    },
}

/// Payload of an `agent_step` event. Full events carry every populated
/// field; settle-pass events only index, name, action and status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub step_index: u32,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StepKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

impl OutboundEvent {
    pub fn thinking() -> Self {
        Self::Thinking {
            status: "thinking".into(),
        }
    }

    pub fn summarized(new_session_id: ExternalSessionId) -> Self {
        Self::Summarized {
            message: SUMMARIZED_MESSAGE.into(),
            new_session_id,
            session_rotated: true,
        }
    }

    pub fn content(chunk: impl Into<String>) -> Self {
        Self::Content {
            chunk: chunk.into(),
        }
    }

    /// Full `agent_step` emitted when a step is first accepted.
    pub fn step_detail(step: &Step) -> Self {
        Self::AgentStep(StepEvent {
            step_index: step.index,
            agent_name: step.agent_name.clone(),
            agent_id: non_empty(&step.agent_id),
            kind: Some(step.kind),
            action: non_empty(&step.action),
            status: step.status,
            rationale: step.rationale.clone(),
            observation: step.observation.clone(),
            input: step.input.clone(),
            output: step.output.clone(),
            duration: (step.duration_ms != 0).then_some(step.duration_ms),
        })
    }

    /// Terse `agent_step` re-emitted by the settle pass.
    pub fn step_settled(step: &Step) -> Self {
        Self::AgentStep(StepEvent {
            step_index: step.index,
            agent_name: step.agent_name.clone(),
            agent_id: None,
            kind: None,
            action: non_empty(&step.action),
            status: step.status,
            rationale: None,
            observation: None,
            input: None,
            output: None,
            duration: None,
        })
    }

    pub fn trace(trace: &Trace) -> Self {
        Self::Trace {
            trace_id: trace.trace_id.clone(),
            agent_steps: trace.steps.clone(),
        }
    }

    pub fn error(info: ErrorInfo) -> Self {
        Self::Error(info)
    }

    pub fn done(message_id: Option<&MessageId>) -> Self {
        Self::Done {
            message_id: message_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }

    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Summarized { .. } => "summarized",
            Self::Content { .. } => "content",
            Self::AgentStep(_) => "agent_step",
            Self::Trace { .. } => "trace",
            Self::Error(_) => "error",
            Self::Done { .. } => "done",
        }
    }

    /// JSON payload for the `data` line of the frame.
    pub fn data(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    /// Render as a complete SSE frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}
