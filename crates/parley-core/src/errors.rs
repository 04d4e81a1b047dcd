/// Failures talking to the external agent, either while initiating an
/// invocation or in the middle of its response stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AgentError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("throttled by agent service")]
    Throttled,
    #[error("agent rejected request {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("agent reported failure: {0}")]
    Failure(String),
}

impl AgentError {
    /// Short classification string, used as the `type` of outbound error
    /// events and as a log field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::Throttled => "throttled",
            Self::Rejected { .. } => "rejected",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Failure(_) => "agent_failure",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::Throttled,
            _ => Self::Rejected { status, body },
        }
    }
}

/// Failures producing a compaction summary. Always recovered by the caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("summarizer rejected request {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("no content in summarization response")]
    EmptyResponse,
    #[error("invalid summarization response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            AgentError::from_status(401, "no".into()),
            AgentError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            AgentError::from_status(403, "no".into()),
            AgentError::AuthenticationFailed(_)
        ));
        assert!(matches!(AgentError::from_status(429, String::new()), AgentError::Throttled));
        match AgentError::from_status(502, "bad gateway".into()) {
            AgentError::Rejected { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_kinds() {
        assert_eq!(AgentError::Throttled.error_kind(), "throttled");
        assert_eq!(AgentError::Network("tcp".into()).error_kind(), "network_error");
        assert_eq!(AgentError::Failure("x".into()).error_kind(), "agent_failure");
    }

    #[test]
    fn display_includes_detail() {
        let err = SummarizationError::Rejected { status: 500, body: "oops".into() };
        assert_eq!(err.to_string(), "summarizer rejected request 500: oops");
        assert_eq!(
            SummarizationError::EmptyResponse.to_string(),
            "no content in summarization response"
        );
    }
}
