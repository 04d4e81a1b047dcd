//! Chat orchestrator: connects the turn controller to the HTTP layer.
//!
//! Owns the table of active turns. At most one turn runs per session; a
//! second request for the same session is rejected until the first one has
//! fully finished, including draining the agent stream after an abort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use parley_core::events::OutboundEvent;
use parley_core::ids::SessionId;
use parley_core::trace::ErrorInfo;
use parley_engine::{ChannelSink, EventSink, TurnController, TurnRequest};

const TIMEOUT_ERROR_KIND: &str = "TurnTimeout";

#[derive(Debug, thiserror::Error)]
pub enum TurnRejected {
    #[error("session {0} already has an active turn")]
    Busy(SessionId),
}

/// Events of a started turn. Dropping `events` stops delivery; the turn
/// itself keeps running until the agent is done.
pub struct TurnStream {
    pub events: mpsc::Receiver<OutboundEvent>,
    pub cancel: CancellationToken,
}

struct ActiveTurn {
    turn_id: u64,
    cancel: CancellationToken,
    started_at: Instant,
}

pub struct ChatOrchestrator {
    controller: Arc<TurnController>,
    active: Arc<DashMap<SessionId, ActiveTurn>>,
    next_turn: AtomicU64,
    turn_timeout: Duration,
    event_buffer: usize,
}

impl ChatOrchestrator {
    pub fn new(controller: Arc<TurnController>, turn_timeout: Duration, event_buffer: usize) -> Self {
        Self {
            controller,
            active: Arc::new(DashMap::new()),
            next_turn: AtomicU64::new(1),
            turn_timeout,
            event_buffer,
        }
    }

    /// Claim the session and run the turn in the background.
    pub fn start_turn(&self, request: TurnRequest) -> Result<TurnStream, TurnRejected> {
        let session_id = request.session_id.clone();
        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        match self.active.entry(session_id.clone()) {
            Entry::Occupied(_) => return Err(TurnRejected::Busy(session_id)),
            Entry::Vacant(slot) => {
                slot.insert(ActiveTurn {
                    turn_id,
                    cancel: cancel.clone(),
                    started_at: Instant::now(),
                });
            }
        }

        let (sink, events) = ChannelSink::channel(self.event_buffer);
        let controller = Arc::clone(&self.controller);
        let active = Arc::clone(&self.active);
        let turn_timeout = self.turn_timeout;
        let turn_cancel = cancel.clone();
        let span = tracing::info_span!("chat_turn", session_id = %session_id, turn_id);

        tokio::spawn(
            async move {
                let run = controller.run(request, &sink, &turn_cancel);
                match tokio::time::timeout(turn_timeout, run).await {
                    Ok(Ok(outcome)) => info!(
                        assistant_message_id = ?outcome.assistant_message_id,
                        compacted = outcome.compacted,
                        disconnected = outcome.disconnected,
                        "turn finished"
                    ),
                    Ok(Err(e)) => warn!(error = %e, "turn failed"),
                    Err(_) => {
                        warn!(timeout_secs = turn_timeout.as_secs(), "turn timed out");
                        report_timeout(&sink, &turn_cancel, turn_timeout).await;
                    }
                }
                let elapsed = active
                    .remove_if(&session_id, |_, t| t.turn_id == turn_id)
                    .map(|(_, t)| t.started_at.elapsed());
                if let Some(elapsed) = elapsed {
                    info!(elapsed_ms = elapsed.as_millis() as u64, "session released");
                }
            }
            .instrument(span),
        );

        Ok(TurnStream { events, cancel })
    }

    /// Stop delivering events for the session's active turn.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        match self.active.get(session_id) {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    pub fn abort_all(&self) -> usize {
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
        }
        self.active.len()
    }
}

async fn report_timeout(sink: &ChannelSink, cancel: &CancellationToken, timeout: Duration) {
    if cancel.is_cancelled() || sink.is_closed() {
        return;
    }
    let info = ErrorInfo {
        kind: TIMEOUT_ERROR_KIND.into(),
        message: format!("turn exceeded {}s", timeout.as_secs()),
        source: "ChatOrchestrator".into(),
        stack_trace: None,
    };
    if sink.send(OutboundEvent::error(info)).await {
        sink.send(OutboundEvent::done(None)).await;
    }
}
