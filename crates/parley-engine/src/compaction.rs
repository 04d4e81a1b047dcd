use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use parley_core::ids::{ExternalSessionId, SessionId};
use parley_core::messages::{Message, NewMessage};
use parley_core::summarizer::Summarizer;
use parley_store::SessionStore;

use crate::rotation::rotate_session;
use crate::tokens::estimate;

/// Thresholds for history compaction and summary consumption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Compact once the estimated history size exceeds this many tokens.
    pub token_threshold: usize,
    /// Most recent messages kept verbatim.
    pub keep_recent: usize,
    /// New messages after which a pending summary stops being injected.
    pub summary_consumption_threshold: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_threshold: 120_000,
            keep_recent: 4,
            summary_consumption_threshold: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionDecision {
    Skip { estimated: usize },
    /// Summarize `history[..split]`, keep `history[split..]`.
    Compact { split: usize, estimated: usize },
}

impl CompactionConfig {
    pub fn evaluate(&self, history: &[Message]) -> CompactionDecision {
        let estimated = estimate(history);
        if estimated <= self.token_threshold || history.len() <= self.keep_recent {
            return CompactionDecision::Skip { estimated };
        }
        CompactionDecision::Compact {
            split: history.len() - self.keep_recent,
            estimated,
        }
    }
}

/// Result of a compaction that went all the way through rotation.
#[derive(Clone, Debug)]
pub struct Compacted {
    pub external_session_id: ExternalSessionId,
    pub summarized: usize,
}

/// Summarizes old history and rotates the external session. Best-effort:
/// every failure is logged and reported as "not compacted".
pub struct Compactor {
    config: CompactionConfig,
    store: Arc<dyn SessionStore>,
    summarizer: Arc<dyn Summarizer>,
}

impl Compactor {
    pub fn new(config: CompactionConfig, store: Arc<dyn SessionStore>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            store,
            summarizer,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    #[instrument(skip(self, history), fields(session_id = %session_id, messages = history.len()))]
    pub async fn run(&self, session_id: &SessionId, history: &[Message]) -> Option<Compacted> {
        let split = match self.config.evaluate(history) {
            CompactionDecision::Skip { estimated } => {
                debug!(estimated, threshold = self.config.token_threshold, "compaction not needed");
                return None;
            }
            CompactionDecision::Compact { split, estimated } => {
                info!(estimated, threshold = self.config.token_threshold, split, "compacting history");
                split
            }
        };

        let summary = match self.summarizer.summarize(&history[..split]).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "summarization failed, continuing without compaction");
                return None;
            }
        };

        // Delete and insert are separate statements; a failure in between
        // loses the old messages.
        if let Err(e) = self
            .store
            .delete_messages_except_recent(session_id, self.config.keep_recent)
        {
            warn!(error = %e, "failed to trim history, continuing without compaction");
            return None;
        }
        if let Err(e) = self.store.append_message(session_id, NewMessage::summary(&summary)) {
            error!(error = %e, "history trimmed but summary message was not stored");
            return None;
        }

        match rotate_session(self.store.as_ref(), session_id, &summary) {
            Ok(state) => Some(Compacted {
                external_session_id: state.external_session_id,
                summarized: split,
            }),
            Err(e) => {
                warn!(error = %e, "external session rotation failed, keeping previous id");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::MessageId;
    use parley_core::messages::{Role, SUMMARY_PREFIX};
    use parley_llm::MockSummarizer;
    use parley_store::{Database, SqliteStore};

    use crate::testing::{FailingStore, Op};

    fn msg(content: &str) -> Message {
        Message {
            id: MessageId::new(),
            session_id: SessionId::from_raw("sess_1"),
            role: Role::User,
            content: content.into(),
            document_refs: vec![],
            trace: None,
            created_at: String::new(),
        }
    }

    fn config(threshold: usize) -> CompactionConfig {
        CompactionConfig {
            token_threshold: threshold,
            ..Default::default()
        }
    }

    fn seeded(count: usize, chars: usize) -> (Arc<SqliteStore>, SessionId, Vec<Message>) {
        let store = Arc::new(SqliteStore::new(Database::in_memory().unwrap()));
        let session = store.create_session(None).unwrap();
        for i in 0..count {
            let content = format!("{i:0>width$}", width = chars);
            store.append_message(&session.id, NewMessage::user(content, vec![])).unwrap();
        }
        let history = store.get_messages(&session.id).unwrap();
        (store, session.id, history)
    }

    #[test]
    fn defaults() {
        let c = CompactionConfig::default();
        assert_eq!((c.token_threshold, c.keep_recent, c.summary_consumption_threshold), (120_000, 4, 10));
    }

    #[test]
    fn never_compacts_at_or_below_keep_recent() {
        let huge = "x".repeat(10_000);
        for len in 0..=4 {
            let history: Vec<_> = (0..len).map(|_| msg(&huge)).collect();
            assert!(matches!(config(0).evaluate(&history), CompactionDecision::Skip { .. }));
        }
    }

    #[test]
    fn small_history_below_threshold_skips() {
        let history: Vec<_> = (0..5).map(|_| msg("hello there")).collect();
        match config(1_000_000).evaluate(&history) {
            CompactionDecision::Skip { estimated } => assert!(estimated < 1_000_000),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn threshold_is_strict() {
        let history: Vec<_> = (0..5).map(|_| msg(&"x".repeat(80))).collect();
        assert!(matches!(config(100).evaluate(&history), CompactionDecision::Skip { estimated: 100 }));
        assert!(matches!(
            config(99).evaluate(&history),
            CompactionDecision::Compact { split: 1, estimated: 100 }
        ));
    }

    #[test]
    fn empty_content_messages_count_toward_keep() {
        let mut history: Vec<_> = (0..4).map(|_| msg("")).collect();
        history.insert(0, msg(&"x".repeat(1000)));
        assert!(matches!(config(10).evaluate(&history), CompactionDecision::Compact { split: 1, .. }));
    }

    #[tokio::test]
    async fn compaction_keeps_recent_plus_summary_and_rotates() {
        let (store, sid, history) = seeded(10, 200);
        let before = store.get_session(&sid).unwrap();
        let summarizer = Arc::new(MockSummarizer::returning("they talked"));
        let compactor = Compactor::new(config(100), store.clone(), summarizer.clone());

        let done = compactor.run(&sid, &history).await.expect("compacted");
        assert_eq!(done.summarized, 6);
        assert_eq!(summarizer.inputs()[0].len(), 6);
        assert_eq!(summarizer.inputs()[0][0].id, history[0].id);

        let stored = store.get_messages(&sid).unwrap();
        assert_eq!(stored.len(), 5);
        let kept: Vec<_> = stored[..4].iter().map(|m| m.id.clone()).collect();
        let expected: Vec<_> = history[6..].iter().map(|m| m.id.clone()).collect();
        assert_eq!(kept, expected);
        assert_eq!(stored[4].role, Role::System);
        assert_eq!(stored[4].content, format!("{SUMMARY_PREFIX}they talked"));

        let after = store.get_external_session_state(&sid).unwrap();
        assert_ne!(after.external_session_id, before.external_session_id);
        assert_eq!(after.external_session_id, done.external_session_id);
        assert_eq!(after.pending_summary.as_deref(), Some("they talked"));
        assert_eq!(after.messages_since_rotation, 0);
    }

    #[tokio::test]
    async fn summarizer_failure_leaves_history_untouched() {
        let (store, sid, history) = seeded(10, 200);
        let before = store.get_session(&sid).unwrap();
        let compactor = Compactor::new(config(100), store.clone(), Arc::new(MockSummarizer::failing()));

        assert!(compactor.run(&sid, &history).await.is_none());
        assert_eq!(store.count_messages(&sid).unwrap(), 10);
        let after = store.get_session(&sid).unwrap();
        assert_eq!(after.external_session_id, before.external_session_id);
        assert_eq!(after.pending_summary, None);
    }

    #[tokio::test]
    async fn skip_does_not_call_summarizer() {
        let (store, sid, history) = seeded(5, 10);
        let summarizer = Arc::new(MockSummarizer::returning("unused"));
        let compactor = Compactor::new(config(1_000_000), store, summarizer.clone());
        assert!(compactor.run(&sid, &history).await.is_none());
        assert_eq!(summarizer.call_count(), 0);
    }

    fn failing_seeded(op: Op) -> (Arc<FailingStore>, SessionId, Vec<Message>) {
        let store = Arc::new(FailingStore::new());
        let session = store.create_session(None).unwrap();
        for i in 0..10 {
            let content = format!("{i:0>200}");
            store.append_message(&session.id, NewMessage::user(content, vec![])).unwrap();
        }
        store.fail(op);
        let history = store.get_messages(&session.id).unwrap();
        (store, session.id, history)
    }

    #[tokio::test]
    async fn rotation_failure_keeps_previous_external_id() {
        let (store, sid, history) = failing_seeded(Op::Rotate);
        let before = store.get_external_session_state(&sid).unwrap();
        let compactor = Compactor::new(config(100), store.clone(), Arc::new(MockSummarizer::returning("s")));

        assert!(compactor.run(&sid, &history).await.is_none());
        let after = store.get_external_session_state(&sid).unwrap();
        assert_eq!(after.external_session_id, before.external_session_id);
        assert_eq!(after.pending_summary, None);
        // History was already replaced before rotation was attempted.
        assert_eq!(store.count_messages(&sid).unwrap(), 5);
    }

    #[tokio::test]
    async fn trim_failure_leaves_history_and_id() {
        let (store, sid, history) = failing_seeded(Op::TrimHistory);
        let before = store.get_external_session_state(&sid).unwrap();
        let compactor = Compactor::new(config(100), store.clone(), Arc::new(MockSummarizer::returning("s")));

        assert!(compactor.run(&sid, &history).await.is_none());
        assert_eq!(store.count_messages(&sid).unwrap(), 10);
        assert_eq!(store.get_external_session_state(&sid).unwrap(), before);
    }

    #[tokio::test]
    async fn summary_insert_failure_skips_rotation() {
        let (store, sid, history) = failing_seeded(Op::AppendSummary);
        let before = store.get_external_session_state(&sid).unwrap();
        let compactor = Compactor::new(config(100), store.clone(), Arc::new(MockSummarizer::returning("s")));

        assert!(compactor.run(&sid, &history).await.is_none());
        assert_eq!(store.count_messages(&sid).unwrap(), 4);
        let after = store.get_external_session_state(&sid).unwrap();
        assert_eq!(after.external_session_id, before.external_session_id);
        assert_eq!(after.pending_summary, None);
    }
}
