use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::agent::{AgentRuntime, InvokeRequest};
use parley_core::errors::AgentError;
use parley_core::events::OutboundEvent;
use parley_core::fragments::AgentFragment;
use parley_core::ids::ExternalSessionId;
use parley_core::trace::{ErrorInfo, Trace};

use crate::normalizer::TraceNormalizer;

/// Error `type` reported when the agent call cannot be started.
pub const INVOCATION_ERROR_KIND: &str = "AgentInvocationError";

/// Consumer of outbound events for one turn.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event, waiting for the consumer if it is slow. Returns
    /// false once the consumer has gone away.
    async fn send(&self, event: OutboundEvent) -> bool;

    fn is_closed(&self) -> bool;
}

/// [`EventSink`] over a bounded mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: OutboundEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Gate in front of a sink. Once the consumer is gone (cancelled or
/// closed) nothing else is forwarded for the rest of the turn.
pub(crate) struct Emitter<'a> {
    sink: &'a dyn EventSink,
    cancel: &'a CancellationToken,
    disconnected: bool,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(sink: &'a dyn EventSink, cancel: &'a CancellationToken) -> Self {
        Self {
            sink,
            cancel,
            disconnected: false,
        }
    }

    pub(crate) fn sink(&self) -> &'a dyn EventSink {
        self.sink
    }

    pub(crate) fn cancel(&self) -> &'a CancellationToken {
        self.cancel
    }

    pub(crate) fn disconnected(&self) -> bool {
        self.disconnected
    }

    /// Returns whether the event was delivered.
    pub(crate) async fn emit(&mut self, event: OutboundEvent) -> bool {
        if self.disconnected {
            return false;
        }
        let name = event.name();
        if self.cancel.is_cancelled() || self.sink.is_closed() {
            self.mark_disconnected(name);
            return false;
        }
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            ok = self.sink.send(event) => ok,
        };
        if !delivered {
            self.mark_disconnected(name);
        }
        delivered
    }

    fn mark_disconnected(&mut self, dropped: &str) {
        debug!(event = dropped, "client disconnected, no longer forwarding events");
        self.disconnected = true;
    }
}

/// One agent invocation.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub external_session_id: ExternalSessionId,
    pub text: String,
    /// Emitted right after `thinking`, before any agent output.
    pub notices: Vec<OutboundEvent>,
}

#[derive(Debug)]
pub struct StreamOutcome {
    pub trace: Trace,
    pub final_text: String,
    /// Set only when the invocation could not be started.
    pub error: Option<AgentError>,
    /// The consumer went away before the turn finished.
    pub disconnected: bool,
}

/// Drives one agent invocation and relays it as outbound events:
/// `thinking`, notices, then `content` / `agent_step` in arrival order, a
/// settle pass of `agent_step`s, and the final `trace`.
pub struct StreamOrchestrator {
    runtime: Arc<dyn AgentRuntime>,
    normalizer: TraceNormalizer,
}

impl StreamOrchestrator {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        let normalizer = TraceNormalizer::new(runtime.agent_name(), runtime.agent_id());
        Self { runtime, normalizer }
    }

    #[instrument(skip_all, fields(external_session_id = %request.external_session_id, runtime = self.runtime.name()))]
    pub async fn run(
        &self,
        request: StreamRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let mut emitter = Emitter::new(sink, cancel);
        let mut trace = Trace::new();
        let mut final_text = String::new();

        emitter.emit(OutboundEvent::thinking()).await;
        for notice in request.notices {
            emitter.emit(notice).await;
        }

        let invoke = InvokeRequest::turn(request.external_session_id, request.text);
        let mut stream = match self.runtime.invoke(&invoke).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "agent invocation failed");
                let info = ErrorInfo {
                    kind: INVOCATION_ERROR_KIND.into(),
                    message: e.to_string(),
                    source: self.runtime.name().to_owned(),
                    stack_trace: None,
                };
                trace.fail(info.clone());
                emitter.emit(OutboundEvent::error(info)).await;
                return StreamOutcome {
                    trace,
                    final_text,
                    error: Some(e),
                    disconnected: emitter.disconnected(),
                };
            }
        };

        // Drained to the end even after a disconnect: the agent has already
        // committed to the work, only delivery stops.
        while let Some(item) = stream.next().await {
            let arrived = Utc::now();
            match item {
                Ok(AgentFragment::Chunk(chunk)) => {
                    final_text.push_str(&chunk);
                    emitter.emit(OutboundEvent::content(chunk)).await;
                }
                Ok(AgentFragment::Trace(fragment)) => {
                    let step = self.normalizer.normalize(trace.next_index(), &fragment, arrived);
                    if let Some(step) = trace.push(step) {
                        let event = OutboundEvent::step_detail(step);
                        emitter.emit(event).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, kind = e.error_kind(), "agent stream reported an error");
                    let step = self.normalizer.stream_error(trace.next_index(), &e, arrived);
                    if let Some(step) = trace.push(step) {
                        let event = OutboundEvent::step_detail(step);
                        emitter.emit(event).await;
                    }
                }
            }
        }

        let settled = trace.settle(Utc::now());
        for step in &trace.steps {
            emitter.emit(OutboundEvent::step_settled(step)).await;
        }
        emitter.emit(OutboundEvent::trace(&trace)).await;

        info!(
            steps = trace.steps.len(),
            settled,
            content_chars = final_text.chars().count(),
            disconnected = emitter.disconnected(),
            "agent stream finished"
        );

        StreamOutcome {
            trace,
            final_text,
            error: None,
            disconnected: emitter.disconnected(),
        }
    }
}
