use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::Stream;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use parley_core::agent::{AgentRuntime, FragmentStream, InvokeRequest};
use parley_core::errors::AgentError;
use parley_core::fragments::AgentFragment;

use crate::sse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where and as whom to call the agent gateway.
#[derive(Clone, Debug)]
pub struct AgentGatewayConfig {
    pub endpoint: String,
    pub agent_id: String,
    pub agent_alias: String,
    pub agent_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    agent_id: &'a str,
    agent_alias_id: &'a str,
    session_id: &'a str,
    input_text: &'a str,
    enable_trace: bool,
    end_session: bool,
}

/// Agent reached over HTTP. The gateway answers a POST with an SSE stream of
/// `chunk`, `trace` and `error` events.
pub struct HttpAgentRuntime {
    client: Client,
    config: AgentGatewayConfig,
}

impl HttpAgentRuntime {
    pub fn new(config: AgentGatewayConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Network(format!("build client: {e}")))?;
        Ok(Self { client, config })
    }

    fn body<'a>(&'a self, request: &'a InvokeRequest) -> InvokeBody<'a> {
        InvokeBody {
            agent_id: &self.config.agent_id,
            agent_alias_id: &self.config.agent_alias,
            session_id: request.session_id.as_str(),
            input_text: &request.input_text,
            enable_trace: request.enable_trace,
            end_session: request.end_session,
        }
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    fn name(&self) -> &str {
        "AgentGateway"
    }

    fn agent_name(&self) -> &str {
        &self.config.agent_name
    }

    fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    #[instrument(skip(self, request), fields(external_session_id = %request.session_id))]
    async fn invoke(&self, request: &InvokeRequest) -> Result<FragmentStream, AgentError> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("accept", "text/event-stream")
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_status(status, body));
        }

        debug!("agent stream opened");
        Ok(Box::pin(AgentEventStream::new(resp.bytes_stream(), SSE_IDLE_TIMEOUT)))
    }
}

/// Turns a gateway byte stream into fragments. Gives up with
/// `StreamInterrupted` if no bytes arrive for `idle_duration`.
struct AgentEventStream<E> {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, E>> + Send>>,
    buffer: BytesMut,
    pending: VecDeque<Result<AgentFragment, AgentError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl<E: std::fmt::Display> AgentEventStream<E> {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
        idle_duration: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_duration)),
            idle_duration,
            finished: false,
        }
    }

    /// Frames are decoded only once complete, so a multi-byte character
    /// split across network chunks stays intact.
    fn decode(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        for (event, data) in sse::parse_sse_lines(&text) {
            if let Some(item) = sse::decode_frame(&event, &data) {
                self.pending.push_back(item);
            }
        }
    }

    fn drain_complete_frames(&mut self) {
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame = self.buffer.split_to(pos + 2).freeze();
            self.decode(&frame);
        }
    }
}

impl<E: std::fmt::Display> Stream for AgentEventStream<E> {
    type Item = Result<AgentFragment, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_frames();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(AgentError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    let rest = self.buffer.split().freeze();
                    self.decode(&rest);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(AgentError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::ids::ExternalSessionId;

    type ByteResult = Result<bytes::Bytes, std::io::Error>;

    fn config() -> AgentGatewayConfig {
        AgentGatewayConfig {
            endpoint: "http://127.0.0.1:9/invoke".into(),
            agent_id: "AGENT1".into(),
            agent_alias: "ALIAS1".into(),
            agent_name: "Main Agent".into(),
        }
    }

    fn from_chunks(chunks: Vec<&'static str>) -> AgentEventStream<std::io::Error> {
        let items: Vec<ByteResult> = chunks.into_iter().map(|c| Ok(bytes::Bytes::from(c))).collect();
        AgentEventStream::new(futures::stream::iter(items), Duration::from_secs(5))
    }

    #[test]
    fn runtime_identity() {
        let runtime = HttpAgentRuntime::new(config()).unwrap();
        assert_eq!(runtime.name(), "AgentGateway");
        assert_eq!(runtime.agent_name(), "Main Agent");
        assert_eq!(runtime.agent_id(), "AGENT1");
    }

    #[test]
    fn invoke_body_shape() {
        let runtime = HttpAgentRuntime::new(config()).unwrap();
        let req = InvokeRequest::turn(ExternalSessionId::from_raw("ext_1"), "hello");
        let body = serde_json::to_value(runtime.body(&req)).unwrap();
        assert_eq!(body["agentId"], "AGENT1");
        assert_eq!(body["agentAliasId"], "ALIAS1");
        assert_eq!(body["sessionId"], "ext_1");
        assert_eq!(body["inputText"], "hello");
        assert_eq!(body["enableTrace"], true);
        assert_eq!(body["endSession"], false);
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reassembled() {
        let stream = from_chunks(vec![
            "event: chunk\ndata: {\"te",
            "xt\":\"Hel\"}\n\nevent: chunk\ndata: {\"text\":\"lo\"}\n\n",
            "event: trace\ndata: {\"trace\":{\"type\":\"guardrail\"}}\n\n",
        ]);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Ok(AgentFragment::Chunk(t)) if t == "Hel"));
        assert!(matches!(&items[1], Ok(AgentFragment::Chunk(t)) if t == "lo"));
        assert!(matches!(&items[2], Ok(AgentFragment::Trace(_))));
    }

    #[tokio::test]
    async fn multibyte_char_split_across_chunks_survives() {
        let bytes = "event: chunk\ndata: {\"text\":\"héllo\"}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let items: Vec<ByteResult> = vec![
            Ok(bytes::Bytes::copy_from_slice(&bytes[..split])),
            Ok(bytes::Bytes::copy_from_slice(&bytes[split..])),
        ];
        let stream = AgentEventStream::new(futures::stream::iter(items), Duration::from_secs(5));
        let out: Vec<_> = stream.collect().await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Ok(AgentFragment::Chunk(t)) if t == "héllo"), "got: {out:?}");
    }

    #[tokio::test]
    async fn error_frame_does_not_end_stream() {
        let stream = from_chunks(vec![
            "event: error\ndata: {\"message\":\"tool failed\"}\n\n",
            "event: chunk\ndata: {\"text\":\"recovered\"}",
        ]);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Err(AgentError::Failure(m)) if m == "tool failed"));
        assert!(matches!(&items[1], Ok(AgentFragment::Chunk(t)) if t == "recovered"));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let items: Vec<ByteResult> = vec![
            Ok(bytes::Bytes::from("event: chunk\ndata: {\"text\":\"a\"}\n\n")),
            Err(std::io::Error::other("reset")),
            Ok(bytes::Bytes::from("event: chunk\ndata: {\"text\":\"b\"}\n\n")),
        ];
        let stream = AgentEventStream::new(futures::stream::iter(items), Duration::from_secs(5));
        let out: Vec<_> = stream.collect().await;
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[1], Err(AgentError::StreamInterrupted(m)) if m.contains("reset")));
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();
        let mut stream = Box::pin(AgentEventStream::new(
            futures::stream::pending::<ByteResult>(),
            Duration::from_secs(5),
        ));
        tokio::time::advance(Duration::from_secs(6)).await;
        let item = stream.next().await;
        assert!(
            matches!(&item, Some(Err(AgentError::StreamInterrupted(m))) if m.contains("idle timeout")),
            "got: {item:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timer_resets_on_data() {
        tokio::time::pause();
        let (tx, rx) = tokio::sync::mpsc::channel::<ByteResult>(4);
        let mut stream = Box::pin(AgentEventStream::new(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            Duration::from_secs(5),
        ));

        tx.send(Ok(bytes::Bytes::from("event: chunk\ndata: {\"text\":\"a\"}\n\n")))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Ok(_))));

        tokio::time::advance(Duration::from_secs(4)).await;
        tx.send(Ok(bytes::Bytes::from("event: chunk\ndata: {\"text\":\"b\"}\n\n")))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Ok(_))));

        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
