use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use parley_core::agent::{AgentRuntime, FragmentStream, InvokeRequest};
use parley_core::errors::{AgentError, SummarizationError};
use parley_core::fragments::{AgentFragment, TraceBody, TraceFragment};
use parley_core::messages::Message;
use parley_core::summarizer::Summarizer;

/// Pre-programmed agent behaviour for one `invoke` call.
pub enum MockResponse {
    /// Yield these items in order.
    Fragments(Vec<Result<AgentFragment, AgentError>>),
    /// Yield these items, sleeping before each one.
    Paced(Duration, Vec<Result<AgentFragment, AgentError>>),
    /// Fail the invocation itself.
    Error(AgentError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Text split into one chunk per element.
    pub fn chunks(parts: &[&str]) -> Self {
        Self::Fragments(
            parts
                .iter()
                .map(|p| Ok(AgentFragment::Chunk((*p).to_owned())))
                .collect(),
        )
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Shorthand for a trace fragment from the main agent.
pub fn trace(body: TraceBody) -> Result<AgentFragment, AgentError> {
    Ok(AgentFragment::Trace(TraceFragment::new(body)))
}

pub fn chunk(text: &str) -> Result<AgentFragment, AgentError> {
    Ok(AgentFragment::Chunk(text.to_owned()))
}

/// Agent returning canned responses in call order and recording requests.
pub struct MockAgent {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl MockAgent {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentRuntime for MockAgent {
    fn name(&self) -> &str {
        "MockAgent"
    }

    fn agent_name(&self) -> &str {
        "Main Agent"
    }

    fn agent_id(&self) -> &str {
        "MOCKAGENT"
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<FragmentStream, AgentError> {
        self.requests.lock().push(request.clone());
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let Some(mut current) = self.responses.get(idx) else {
            return Err(AgentError::Failure(format!(
                "MockAgent: no response configured for call {idx}"
            )));
        };
        loop {
            match current {
                MockResponse::Fragments(items) => {
                    return Ok(Box::pin(stream::iter(items.clone())));
                }
                MockResponse::Paced(gap, items) => {
                    let gap = *gap;
                    return Ok(Box::pin(stream::iter(items.clone()).then(move |item| async move {
                        tokio::time::sleep(gap).await;
                        item
                    })));
                }
                MockResponse::Error(e) => return Err(e.clone()),
                MockResponse::Delay(d, inner) => {
                    tokio::time::sleep(*d).await;
                    current = inner.as_ref();
                }
            }
        }
    }
}

/// Summarizer returning canned results in call order.
pub struct MockSummarizer {
    results: Vec<Result<String, SummarizationError>>,
    call_count: AtomicUsize,
    inputs: Mutex<Vec<Vec<Message>>>,
}

impl MockSummarizer {
    pub fn new(results: Vec<Result<String, SummarizationError>>) -> Self {
        Self {
            results,
            call_count: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(summary: &str) -> Self {
        Self::new(vec![Ok(summary.to_owned())])
    }

    pub fn failing() -> Self {
        Self::new(vec![Err(SummarizationError::Transport("mock failure".into()))])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Messages passed to each call.
    pub fn inputs(&self) -> Vec<Vec<Message>> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizationError> {
        if messages.is_empty() {
            return Ok(String::new());
        }
        self.inputs.lock().push(messages.to_vec());
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.results
            .get(idx)
            .cloned()
            .unwrap_or_else(|| Err(SummarizationError::Transport(format!("no result for call {idx}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::ExternalSessionId;

    fn request() -> InvokeRequest {
        InvokeRequest::turn(ExternalSessionId::from_raw("ext_1"), "hi")
    }

    #[tokio::test]
    async fn responses_in_order_and_requests_recorded() {
        let agent = MockAgent::new(vec![
            MockResponse::chunks(&["a", "b"]),
            MockResponse::Error(AgentError::Throttled),
        ]);
        let items: Vec<_> = agent.invoke(&request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(agent.invoke(&request()).await, Err(AgentError::Throttled)));
        assert!(agent.invoke(&request()).await.is_err());
        assert_eq!(agent.call_count(), 3);
        assert_eq!(agent.requests()[0].input_text, "hi");
    }

    #[tokio::test]
    async fn delayed_response_waits() {
        tokio::time::pause();
        let agent = MockAgent::new(vec![MockResponse::delayed(
            Duration::from_secs(3),
            MockResponse::chunks(&["late"]),
        )]);
        let start = tokio::time::Instant::now();
        let items: Vec<_> = agent.invoke(&request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn paced_response_sleeps_between_items() {
        tokio::time::pause();
        let agent = MockAgent::new(vec![MockResponse::Paced(
            Duration::from_millis(100),
            vec![chunk("a"), chunk("b")],
        )]);
        let start = tokio::time::Instant::now();
        let items: Vec<_> = agent.invoke(&request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn summarizer_results_and_inputs() {
        let s = MockSummarizer::returning("short");
        assert_eq!(s.summarize(&[]).await.unwrap(), "");
        assert_eq!(s.call_count(), 0);
        let msg = Message {
            id: parley_core::ids::MessageId::new(),
            session_id: parley_core::ids::SessionId::from_raw("sess_1"),
            role: parley_core::messages::Role::User,
            content: "x".into(),
            document_refs: vec![],
            trace: None,
            created_at: String::new(),
        };
        assert_eq!(s.summarize(&[msg.clone()]).await.unwrap(), "short");
        assert!(s.summarize(&[msg]).await.is_err());
        assert_eq!(s.inputs().len(), 2);
    }
}
