use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::AgentError;
use crate::fragments::AgentFragment;
use crate::ids::ExternalSessionId;

/// Response stream of one agent invocation. An `Err` item is a mid-stream
/// failure; it does not end the stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<AgentFragment, AgentError>> + Send>>;

/// Parameters of a single agent call.
#[derive(Clone, Debug)]
pub struct InvokeRequest {
    pub session_id: ExternalSessionId,
    pub input_text: String,
    pub enable_trace: bool,
    pub end_session: bool,
}

impl InvokeRequest {
    /// Request used for a conversational turn: trace on, session kept open.
    pub fn turn(session_id: ExternalSessionId, input_text: impl Into<String>) -> Self {
        Self {
            session_id,
            input_text: input_text.into(),
            enable_trace: true,
            end_session: false,
        }
    }
}

/// An external reasoning agent. Opaque: accepts a session id and text, and
/// produces an interleaved stream of content chunks and trace fragments.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Name used as the `source` of invocation error events.
    fn name(&self) -> &str;
    /// Display name of the main agent, used for steps with no collaborator.
    fn agent_name(&self) -> &str;
    fn agent_id(&self) -> &str;

    async fn invoke(&self, request: &InvokeRequest) -> Result<FragmentStream, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_request_enables_trace_and_keeps_session() {
        let req = InvokeRequest::turn(ExternalSessionId::from_raw("ext_1"), "hello");
        assert!(req.enable_trace);
        assert!(!req.end_session);
        assert_eq!(req.input_text, "hello");
        assert_eq!(req.session_id.as_str(), "ext_1");
    }
}
