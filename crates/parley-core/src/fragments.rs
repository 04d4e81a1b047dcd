//! Raw units of an agent response stream.
//!
//! A response is an interleaving of content chunks and trace fragments. Trace
//! fragments are a tagged union mirroring the phases an agent reports
//! (pre-processing, orchestration, post-processing, failure, guardrail); the
//! normalizer in `parley-engine` turns each one into at most one `Step`.

use serde::{Deserialize, Serialize};

/// One unit of the agent response stream, in delivery order.
#[derive(Clone, Debug)]
pub enum AgentFragment {
    Chunk(String),
    Trace(TraceFragment),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFragment {
    /// Set when the fragment was produced by a collaborator agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborator_name: Option<String>,
    pub trace: TraceBody,
}

impl TraceFragment {
    pub fn new(trace: TraceBody) -> Self {
        Self {
            collaborator_name: None,
            trace,
        }
    }

    pub fn from_collaborator(name: impl Into<String>, trace: TraceBody) -> Self {
        Self {
            collaborator_name: Some(name.into()),
            trace,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceBody {
    PreProcessing { part: PreProcessingPart },
    Orchestration { part: OrchestrationPart },
    PostProcessing { part: PostProcessingPart },
    Failure {
        #[serde(default, rename = "failureReason")]
        failure_reason: Option<String>,
    },
    Guardrail,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreProcessingPart {
    ModelInput {
        #[serde(default)]
        text: Option<String>,
    },
    ModelOutput {
        #[serde(default)]
        rationale: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationPart {
    ModelInput {
        #[serde(default)]
        text: Option<String>,
    },
    Rationale {
        #[serde(default)]
        text: Option<String>,
    },
    Invocation(InvocationInput),
    Observation(Observation),
    ModelOutput,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostProcessingPart {
    ModelOutput {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// What the orchestrator decided to call. More than one target may be set;
/// they apply in field order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborator: Option<CollaboratorCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_group: Option<ActionGroupCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseLookup>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub api_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseLookup {
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// What came back from an invocation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborator: Option<CollaboratorOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_group: Option<ActionGroupOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<FinalResponse>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorOutput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseOutput {
    #[serde(default)]
    pub retrieved_references: Option<Vec<serde_json::Value>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupOutput {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResponse {
    #[serde(default)]
    pub text: Option<String>,
}
