use tracing::instrument;

use parley_core::ids::{ExternalSessionId, SessionId};
use parley_core::session::{ExternalSessionState, Session, DEFAULT_SESSION_TITLE};

use crate::database::{now_timestamp, Database};
use crate::error::StoreError;
use crate::row_helpers;

const SESSION_COLUMNS: &str = "id, title, external_session_id, pending_summary,
     messages_since_rotation, created_at, updated_at";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a session with a fresh external identity. A blank title
    /// falls back to "New Chat".
    #[instrument(skip(self))]
    pub fn create(&self, title: Option<&str>) -> Result<Session, StoreError> {
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => DEFAULT_SESSION_TITLE.to_owned(),
        };
        let session = Session {
            id: SessionId::new(),
            title,
            external_session_id: ExternalSessionId::new(),
            pending_summary: None,
            messages_since_rotation: 0,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, external_session_id, messages_since_rotation, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                rusqlite::params![
                    session.id.as_str(),
                    session.title,
                    session.external_session_id.as_str(),
                    session.created_at,
                    session.updated_at,
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Most recently updated first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, rowid DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
    }

    #[instrument(skip(self, title), fields(session_id = %id))]
    pub fn update_title(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now_timestamp(), id.as_str()],
        )
    }

    /// Delete a session. Messages and documents go with it.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.update(id, "DELETE FROM sessions WHERE id = ?1", rusqlite::params![id.as_str()])
    }

    #[instrument(skip(self), fields(session_id = %id, external_session_id = %external_id))]
    pub fn set_external_session_id(
        &self,
        id: &SessionId,
        external_id: &ExternalSessionId,
    ) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE sessions SET external_session_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![external_id.as_str(), now_timestamp(), id.as_str()],
        )
    }

    #[instrument(skip(self, summary), fields(session_id = %id, clearing = summary.is_none()))]
    pub fn set_pending_summary(&self, id: &SessionId, summary: Option<&str>) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE sessions SET pending_summary = ?1 WHERE id = ?2",
            rusqlite::params![summary, id.as_str()],
        )
    }

    pub fn external_state(&self, id: &SessionId) -> Result<ExternalSessionState, StoreError> {
        self.get(id).map(|s| s.external_state())
    }

    /// Persist a rotated external state in one statement.
    #[instrument(skip(self, state), fields(session_id = %id, external_session_id = %state.external_session_id))]
    pub fn apply_rotation(&self, id: &SessionId, state: &ExternalSessionState) -> Result<(), StoreError> {
        self.update(
            id,
            "UPDATE sessions
             SET external_session_id = ?1, pending_summary = ?2, messages_since_rotation = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                state.external_session_id.as_str(),
                state.pending_summary,
                state.messages_since_rotation,
                now_timestamp(),
                id.as_str(),
            ],
        )
    }

    fn update(
        &self,
        id: &SessionId,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| Ok(conn.execute(sql, params)?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    Ok(Session {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        title: row_helpers::get(row, 1, "sessions", "title")?,
        external_session_id: ExternalSessionId::from_raw(row_helpers::get::<String>(
            row,
            2,
            "sessions",
            "external_session_id",
        )?),
        pending_summary: row_helpers::get_opt(row, 3, "sessions", "pending_summary")?,
        messages_since_rotation: row_helpers::get(row, 4, "sessions", "messages_since_rotation")?,
        created_at: row_helpers::get(row, 5, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 6, "sessions", "updated_at")?,
    })
}
