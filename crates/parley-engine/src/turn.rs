use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use parley_core::agent::AgentRuntime;
use parley_core::events::OutboundEvent;
use parley_core::ids::{DocumentId, MessageId, SessionId};
use parley_core::messages::NewMessage;
use parley_core::session::Document;
use parley_core::summarizer::Summarizer;
use parley_core::trace::ErrorInfo;
use parley_store::SessionStore;

use crate::compaction::{CompactionConfig, Compactor};
use crate::error::EngineError;
use crate::rotation::consume;
use crate::stream::{EventSink, Emitter, StreamOrchestrator, StreamRequest};

const TURN_ERROR_KIND: &str = "TurnError";
const TURN_ERROR_SOURCE: &str = "SessionStore";

/// One user message to answer.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub message: String,
    pub document_ids: Vec<DocumentId>,
}

#[derive(Clone, Debug, Default)]
pub struct TurnOutcome {
    pub user_message_id: Option<MessageId>,
    pub assistant_message_id: Option<MessageId>,
    pub compacted: bool,
    pub disconnected: bool,
}

/// Runs a full turn: compaction, prompt assembly, persistence and the agent
/// stream, ending with `done`.
pub struct TurnController {
    store: Arc<dyn SessionStore>,
    compactor: Compactor,
    orchestrator: StreamOrchestrator,
}

impl TurnController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        summarizer: Arc<dyn Summarizer>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            compactor: Compactor::new(config, store.clone(), summarizer),
            orchestrator: StreamOrchestrator::new(runtime),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Errors before the agent is invoked are reported to the sink as an
    /// `error` event followed by an empty `done`, and returned. A rotation
    /// that already happened is still announced with `summarized`.
    #[instrument(skip_all, fields(session_id = %request.session_id))]
    pub async fn run(
        &self,
        request: TurnRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut emitter = Emitter::new(sink, cancel);
        let mut notices = Vec::new();
        match self.prepare(&request, &mut notices).await {
            Ok(mut prepared) => {
                prepared.stream.notices = notices;
                self.execute(request, prepared, &mut emitter).await
            }
            Err(e) => {
                error!(error = %e, "turn setup failed");
                for notice in notices {
                    emitter.emit(notice).await;
                }
                emitter.emit(OutboundEvent::error(turn_error(&e))).await;
                emitter.emit(OutboundEvent::done(None)).await;
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        request: &TurnRequest,
        notices: &mut Vec<OutboundEvent>,
    ) -> Result<Prepared, EngineError> {
        let session_id = &request.session_id;
        let session = self
            .store
            .get_session(session_id)
            .map_err(|e| EngineError::from_store(e, session_id.as_str()))?;
        let history = self.store.get_messages(session_id)?;

        let compacted = self.compactor.run(session_id, &history).await;
        if let Some(c) = &compacted {
            notices.push(OutboundEvent::summarized(c.external_session_id.clone()));
        }
        let state = match &compacted {
            Some(_) => self.store.get_external_session_state(session_id)?,
            None => session.external_state(),
        };

        let documents = self.store.get_documents(session_id, &request.document_ids)?;
        let injection = consume(&state, self.compactor.config().summary_consumption_threshold);
        let text = compose_outbound_text(&documents, injection.summary.as_deref(), &request.message);

        let user = self.store.append_message(
            session_id,
            NewMessage::user(request.message.clone(), request.document_ids.clone()),
        )?;

        Ok(Prepared {
            stream: StreamRequest {
                external_session_id: state.external_session_id,
                text,
                notices: Vec::new(),
            },
            user_message_id: user.id,
            compacted: compacted.is_some(),
            clear_pending_summary: injection.clear.then_some(state.messages_since_rotation),
        })
    }

    async fn execute(
        &self,
        request: TurnRequest,
        prepared: Prepared,
        emitter: &mut Emitter<'_>,
    ) -> Result<TurnOutcome, EngineError> {
        let outcome = self
            .orchestrator
            .run(prepared.stream, emitter.sink(), emitter.cancel())
            .await;

        // The final injection only counts once the agent actually received it.
        if let Some(messages_since_rotation) = prepared.clear_pending_summary {
            if outcome.error.is_none() {
                self.clear_pending_summary(&request.session_id, messages_since_rotation);
            }
        }

        let mut result = TurnOutcome {
            user_message_id: Some(prepared.user_message_id),
            assistant_message_id: None,
            compacted: prepared.compacted,
            disconnected: outcome.disconnected,
        };
        if outcome.disconnected {
            info!("client disconnected, assistant reply not persisted");
            return Ok(result);
        }

        if !outcome.final_text.is_empty() {
            match self.store.append_message(
                &request.session_id,
                NewMessage::assistant(outcome.final_text, outcome.trace),
            ) {
                Ok(message) => result.assistant_message_id = Some(message.id),
                Err(e) => {
                    error!(error = %e, "failed to persist assistant message");
                    let e = EngineError::Store(e);
                    emitter.emit(OutboundEvent::error(turn_error(&e))).await;
                    emitter.emit(OutboundEvent::done(None)).await;
                    return Err(e);
                }
            }
        } else if let Some(e) = &outcome.error {
            warn!(error = %e, "turn ended without a reply");
        }

        emitter
            .emit(OutboundEvent::done(result.assistant_message_id.as_ref()))
            .await;
        result.disconnected = emitter.disconnected();
        Ok(result)
    }

    fn clear_pending_summary(&self, session_id: &SessionId, messages_since_rotation: u32) {
        match self.store.set_pending_summary(session_id, None) {
            Ok(()) => info!(messages_since_rotation, "pending summary consumed"),
            Err(e) => warn!(error = %e, "failed to clear pending summary, it will be sent again"),
        }
    }
}

struct Prepared {
    stream: StreamRequest,
    user_message_id: MessageId,
    compacted: bool,
    /// Counter value when the final injection was decided.
    clear_pending_summary: Option<u32>,
}

fn turn_error(e: &EngineError) -> ErrorInfo {
    ErrorInfo {
        kind: TURN_ERROR_KIND.into(),
        message: e.to_string(),
        source: TURN_ERROR_SOURCE.into(),
        stack_trace: None,
    }
}

/// Text actually sent to the agent: attached documents, then any carried
/// over summary, then the user's message. With neither block the message is
/// sent as is.
pub fn compose_outbound_text(documents: &[Document], summary: Option<&str>, message: &str) -> String {
    let mut blocks = Vec::new();

    let entries: Vec<String> = documents
        .iter()
        .filter(|d| !d.content.is_empty())
        .map(|d| format!("[Document: {}]\n{}", d.filename, d.content))
        .collect();
    if !entries.is_empty() {
        blocks.push(format!("[Document Context]\n{}", entries.join("\n\n")));
    }

    if let Some(summary) = summary.filter(|s| !s.is_empty()) {
        blocks.push(format!("[Previous Conversation Context]\n{summary}"));
    }

    if blocks.is_empty() {
        return message.to_owned();
    }
    blocks.push(format!("[Current Message]\n{message}"));
    blocks.join("\n\n")
}
