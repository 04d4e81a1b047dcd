use std::collections::HashMap;

use tracing::instrument;

use parley_core::ids::{DocumentId, SessionId};
use parley_core::session::{Document, NewDocument};

use crate::database::{now_timestamp, Database};
use crate::error::StoreError;
use crate::row_helpers;

const DOCUMENT_COLUMNS: &str = "id, session_id, filename, file_type, content, created_at";

pub struct DocumentRepo {
    db: Database,
}

impl DocumentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, doc), fields(session_id = %session_id, filename = %doc.filename))]
    pub fn add(&self, session_id: &SessionId, doc: NewDocument) -> Result<Document, StoreError> {
        let stored = Document {
            id: DocumentId::new(),
            session_id: session_id.clone(),
            filename: doc.filename,
            file_type: doc.file_type,
            content: doc.content,
            created_at: now_timestamp(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, session_id, filename, file_type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    stored.id.as_str(),
                    session_id.as_str(),
                    stored.filename,
                    stored.file_type,
                    stored.content,
                    stored.created_at,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::NotFound(format!("session {session_id}"))
                }
                other => other.into(),
            })?;
            Ok(())
        })?;
        Ok(stored)
    }

    /// Fetch a session's documents by id, in the order requested. Unknown
    /// ids and ids owned by other sessions are skipped; duplicates are
    /// returned once.
    pub fn get_many(&self, session_id: &SessionId, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let mut found: HashMap<String, Document> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE session_id = ?1 AND id IN ({placeholders})"
            ))?;
            let params = std::iter::once(session_id.as_str()).chain(ids.iter().map(|id| id.as_str()));
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            let mut out = HashMap::new();
            while let Some(row) = rows.next()? {
                let doc = row_to_document(row)?;
                out.insert(doc.id.as_str().to_owned(), doc);
            }
            Ok(out)
        })?;
        Ok(ids.iter().filter_map(|id| found.remove(id.as_str())).collect())
    }

    /// Oldest first.
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<Document>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut docs = Vec::new();
            while let Some(row) = rows.next()? {
                docs.push(row_to_document(row)?);
            }
            Ok(docs)
        })
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> Result<Document, StoreError> {
    Ok(Document {
        id: DocumentId::from_raw(row_helpers::get::<String>(row, 0, "documents", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "documents", "session_id")?),
        filename: row_helpers::get(row, 2, "documents", "filename")?,
        file_type: row_helpers::get(row, 3, "documents", "file_type")?,
        content: row_helpers::get(row, 4, "documents", "content")?,
        created_at: row_helpers::get(row, 5, "documents", "created_at")?,
    })
}
