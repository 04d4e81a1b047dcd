//! Store wrapper for exercising the recovered failure paths.

use std::collections::HashSet;

use parking_lot::Mutex;

use parley_core::ids::{DocumentId, ExternalSessionId, SessionId};
use parley_core::messages::{Message, NewMessage, Role, SUMMARY_PREFIX};
use parley_core::session::{Document, ExternalSessionState, NewDocument, Session};
use parley_store::{Database, SessionStore, SqliteStore, StoreError};

/// Operations that can be made to fail. The summary append is separate
/// from ordinary message appends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    AppendMessage,
    AppendSummary,
    TrimHistory,
    Rotate,
    GetDocuments,
}

/// In-memory [`SqliteStore`] whose selected operations return
/// `StoreError::Database`.
pub(crate) struct FailingStore {
    inner: SqliteStore,
    failing: Mutex<HashSet<Op>>,
}

impl FailingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteStore::new(Database::in_memory().unwrap()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail(&self, op: Op) {
        self.failing.lock().insert(op);
    }

    fn check(&self, op: Op) -> Result<(), StoreError> {
        if self.failing.lock().contains(&op) {
            return Err(StoreError::Database(format!("{op:?} unavailable")));
        }
        Ok(())
    }
}

impl SessionStore for FailingStore {
    fn create_session(&self, title: Option<&str>) -> Result<Session, StoreError> {
        self.inner.create_session(title)
    }

    fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.inner.get_session(id)
    }

    fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.inner.list_sessions()
    }

    fn update_title(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.inner.update_title(id, title)
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.inner.delete_session(id)
    }

    fn append_message(&self, session_id: &SessionId, message: NewMessage) -> Result<Message, StoreError> {
        let is_summary = message.role == Role::System && message.content.starts_with(SUMMARY_PREFIX);
        self.check(if is_summary { Op::AppendSummary } else { Op::AppendMessage })?;
        self.inner.append_message(session_id, message)
    }

    fn get_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.inner.get_messages(session_id)
    }

    fn delete_messages_except_recent(&self, session_id: &SessionId, keep: usize) -> Result<usize, StoreError> {
        self.check(Op::TrimHistory)?;
        self.inner.delete_messages_except_recent(session_id, keep)
    }

    fn count_messages(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.inner.count_messages(session_id)
    }

    fn clear_messages(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.inner.clear_messages(session_id)
    }

    fn set_external_session_id(&self, session_id: &SessionId, external_id: &ExternalSessionId) -> Result<(), StoreError> {
        self.inner.set_external_session_id(session_id, external_id)
    }

    fn set_pending_summary(&self, session_id: &SessionId, summary: Option<&str>) -> Result<(), StoreError> {
        self.inner.set_pending_summary(session_id, summary)
    }

    fn get_external_session_state(&self, session_id: &SessionId) -> Result<ExternalSessionState, StoreError> {
        self.inner.get_external_session_state(session_id)
    }

    fn rotate_external_session(&self, session_id: &SessionId, state: &ExternalSessionState) -> Result<(), StoreError> {
        self.check(Op::Rotate)?;
        self.inner.rotate_external_session(session_id, state)
    }

    fn add_document(&self, session_id: &SessionId, document: NewDocument) -> Result<Document, StoreError> {
        self.inner.add_document(session_id, document)
    }

    fn get_documents(&self, session_id: &SessionId, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        self.check(Op::GetDocuments)?;
        self.inner.get_documents(session_id, ids)
    }

    fn list_documents(&self, session_id: &SessionId) -> Result<Vec<Document>, StoreError> {
        self.inner.list_documents(session_id)
    }
}
