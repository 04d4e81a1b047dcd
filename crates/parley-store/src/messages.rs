use tracing::instrument;

use parley_core::ids::{DocumentId, MessageId, SessionId};
use parley_core::messages::{Message, NewMessage, Role};
use parley_core::trace::Trace;

use crate::database::{now_timestamp, Database};
use crate::error::StoreError;
use crate::row_helpers;

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, document_refs, trace, created_at";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Bumps the session's `updated_at` and its
    /// post-rotation message counter in the same transaction.
    #[instrument(skip(self, message), fields(session_id = %session_id, role = %message.role))]
    pub fn append(&self, session_id: &SessionId, message: NewMessage) -> Result<Message, StoreError> {
        let stored = Message {
            id: MessageId::new(),
            session_id: session_id.clone(),
            role: message.role,
            content: message.content,
            document_refs: message.document_refs,
            trace: message.trace,
            created_at: now_timestamp(),
        };
        let refs = serde_json::to_string(&stored.document_refs)?;
        let trace = stored.trace.as_ref().map(serde_json::to_string).transpose()?;

        self.db.with_tx(|tx| {
            let touched = tx.execute(
                "UPDATE sessions
                 SET updated_at = ?1, messages_since_rotation = messages_since_rotation + 1
                 WHERE id = ?2",
                rusqlite::params![stored.created_at, session_id.as_str()],
            )?;
            if touched == 0 {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }
            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, document_refs, trace, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    stored.id.as_str(),
                    session_id.as_str(),
                    stored.role.to_string(),
                    stored.content,
                    refs,
                    trace,
                    stored.created_at,
                ],
            )?;
            Ok(())
        })?;
        Ok(stored)
    }

    /// Oldest first; ties fall back to insertion order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            Ok(messages)
        })
    }

    /// Delete all but the `keep` most recent messages. Returns how many
    /// were removed.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_except_recent(&self, session_id: &SessionId, keep: usize) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM messages WHERE session_id = ?1 AND id NOT IN (
                     SELECT id FROM messages WHERE session_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2
                 )",
                rusqlite::params![session_id.as_str(), keep as i64],
            )?)
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn clear(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role: String = row_helpers::get(row, 2, "messages", "role")?;
    let refs: String = row_helpers::get(row, 4, "messages", "document_refs")?;
    let trace: Option<String> = row_helpers::get_opt(row, 5, "messages", "trace")?;

    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        role: row_helpers::parse_enum::<Role>(&role, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        document_refs: row_helpers::parse_json::<Vec<DocumentId>>(&refs, "messages", "document_refs")?,
        trace: trace
            .map(|raw| row_helpers::parse_json::<Trace>(&raw, "messages", "trace"))
            .transpose()?,
        created_at: row_helpers::get(row, 6, "messages", "created_at")?,
    })
}
