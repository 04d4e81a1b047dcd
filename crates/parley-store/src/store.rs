use parley_core::ids::{DocumentId, ExternalSessionId, SessionId};
use parley_core::messages::{Message, NewMessage};
use parley_core::session::{Document, ExternalSessionState, NewDocument, Session};

use crate::database::Database;
use crate::documents::DocumentRepo;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::sessions::SessionRepo;

/// Persistence boundary for conversations. Implementations must be safe to
/// share across turns of different sessions.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, title: Option<&str>) -> Result<Session, StoreError>;
    fn get_session(&self, id: &SessionId) -> Result<Session, StoreError>;
    fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;
    fn update_title(&self, id: &SessionId, title: &str) -> Result<(), StoreError>;
    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;

    fn append_message(&self, session_id: &SessionId, message: NewMessage) -> Result<Message, StoreError>;
    fn get_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;
    fn delete_messages_except_recent(&self, session_id: &SessionId, keep: usize) -> Result<usize, StoreError>;
    fn count_messages(&self, session_id: &SessionId) -> Result<usize, StoreError>;
    fn clear_messages(&self, session_id: &SessionId) -> Result<usize, StoreError>;

    fn set_external_session_id(&self, session_id: &SessionId, external_id: &ExternalSessionId) -> Result<(), StoreError>;
    fn set_pending_summary(&self, session_id: &SessionId, summary: Option<&str>) -> Result<(), StoreError>;
    fn get_external_session_state(&self, session_id: &SessionId) -> Result<ExternalSessionState, StoreError>;
    /// Persist a rotated state (new external id, pending summary, reset
    /// counter) as a single update.
    fn rotate_external_session(&self, session_id: &SessionId, state: &ExternalSessionState) -> Result<(), StoreError>;

    fn add_document(&self, session_id: &SessionId, document: NewDocument) -> Result<Document, StoreError>;
    /// Only documents belonging to `session_id` are returned.
    fn get_documents(&self, session_id: &SessionId, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError>;
    fn list_documents(&self, session_id: &SessionId) -> Result<Vec<Document>, StoreError>;
}

/// [`SessionStore`] over a single SQLite database.
pub struct SqliteStore {
    sessions: SessionRepo,
    messages: MessageRepo,
    documents: DocumentRepo,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            documents: DocumentRepo::new(db),
        }
    }
}

impl SessionStore for SqliteStore {
    fn create_session(&self, title: Option<&str>) -> Result<Session, StoreError> {
        self.sessions.create(title)
    }

    fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions.get(id)
    }

    fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.sessions.list()
    }

    fn update_title(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.sessions.update_title(id, title)
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.delete(id)
    }

    fn append_message(&self, session_id: &SessionId, message: NewMessage) -> Result<Message, StoreError> {
        self.messages.append(session_id, message)
    }

    fn get_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.messages.list(session_id)
    }

    fn delete_messages_except_recent(&self, session_id: &SessionId, keep: usize) -> Result<usize, StoreError> {
        self.messages.delete_except_recent(session_id, keep)
    }

    fn count_messages(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.messages.count(session_id)
    }

    fn clear_messages(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.messages.clear(session_id)
    }

    fn set_external_session_id(&self, session_id: &SessionId, external_id: &ExternalSessionId) -> Result<(), StoreError> {
        self.sessions.set_external_session_id(session_id, external_id)
    }

    fn set_pending_summary(&self, session_id: &SessionId, summary: Option<&str>) -> Result<(), StoreError> {
        self.sessions.set_pending_summary(session_id, summary)
    }

    fn get_external_session_state(&self, session_id: &SessionId) -> Result<ExternalSessionState, StoreError> {
        self.sessions.external_state(session_id)
    }

    fn rotate_external_session(&self, session_id: &SessionId, state: &ExternalSessionState) -> Result<(), StoreError> {
        self.sessions.apply_rotation(session_id, state)
    }

    fn add_document(&self, session_id: &SessionId, document: NewDocument) -> Result<Document, StoreError> {
        self.documents.add(session_id, document)
    }

    fn get_documents(&self, session_id: &SessionId, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        self.documents.get_many(session_id, ids)
    }

    fn list_documents(&self, session_id: &SessionId) -> Result<Vec<Document>, StoreError> {
        self.documents.list(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_object_safe_and_shares_one_database() {
        let store: Box<dyn SessionStore> = Box::new(SqliteStore::new(Database::in_memory().unwrap()));
        let session = store.create_session(Some("Shared")).unwrap();
        store
            .append_message(&session.id, NewMessage::user("hello", vec![]))
            .unwrap();
        assert_eq!(store.count_messages(&session.id).unwrap(), 1);
        assert_eq!(
            store.get_external_session_state(&session.id).unwrap().messages_since_rotation,
            1
        );
    }

    #[test]
    fn rotation_resets_counter_but_keeps_messages() {
        let store = SqliteStore::new(Database::in_memory().unwrap());
        let session = store.create_session(None).unwrap();
        for i in 0..3 {
            store
                .append_message(&session.id, NewMessage::user(format!("m{i}"), vec![]))
                .unwrap();
        }
        let rotated = ExternalSessionState {
            external_session_id: ExternalSessionId::new(),
            pending_summary: Some("s".into()),
            messages_since_rotation: 0,
        };
        store.rotate_external_session(&session.id, &rotated).unwrap();
        assert_eq!(store.get_external_session_state(&session.id).unwrap(), rotated);
        assert_eq!(store.count_messages(&session.id).unwrap(), 3);
    }
}
