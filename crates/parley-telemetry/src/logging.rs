use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::TelemetryError;

const LOG_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        session_id TEXT,
        external_session_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);";

/// A persisted warn+ log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub external_session_id: Option<String>,
}

/// Filters for persisted logs. Deserializes from `?level=&sessionId=` style
/// query strings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink for warn+ events.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn open(db_path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, TelemetryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &LogEntry) {
        let conn = self.conn.lock();
        // A failing log write must never take the request down with it.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, external_session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.session_id,
                entry.external_session_id,
            ],
        );
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, TelemetryError> {
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, session_id, external_session_id
             FROM logs WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        let mut filter = |clause: &str, value: String| {
            args.push(value);
            sql.push_str(&format!(" AND {clause} ?{}", args.len()));
        };
        if let Some(level) = &q.level {
            filter("level =", level.to_uppercase());
        }
        if let Some(target) = &q.target {
            filter("target LIKE", format!("%{target}%"));
        }
        if let Some(session_id) = &q.session_id {
            filter("session_id =", session_id.clone());
        }
        if let Some(since) = &q.since {
            filter("timestamp >=", since.clone());
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                session_id: row.get(6)?,
                external_session_id: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<i64, TelemetryError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?)
    }

    /// Drop records older than `cutoff`. Returns the number removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TelemetryError> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM logs WHERE timestamp < ?1",
            [cutoff.to_rfc3339()],
        )?)
    }
}

struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    external_session_id: Option<String>,
}

/// Layer that writes warn+ events to a [`SqliteLogSink`], tagging each with
/// the session ids found on the event or any enclosing span.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    external_session_id: Option<String>,
}

impl FieldVisitor {
    fn record_string(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "session_id" => self.session_id = Some(value),
            "external_session_id" => self.external_session_id = Some(value),
            other => {
                self.fields
                    .insert(other.to_owned(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.record_string(field.name(), rendered.trim_matches('"').to_owned());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_string(field.name(), value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_owned(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_owned(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_owned(), value.into());
    }
}

/// Session ids recorded on a span, inherited by events inside it.
struct SpanSessionIds {
    session_id: Option<String>,
    external_session_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.session_id.is_none() && visitor.external_session_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanSessionIds {
                session_id: visitor.session_id,
                external_session_id: visitor.external_session_id,
            });
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                let Some(ids) = extensions.get::<SpanSessionIds>() else {
                    continue;
                };
                if visitor.session_id.is_none() {
                    visitor.session_id.clone_from(&ids.session_id);
                }
                if visitor.external_session_id.is_none() {
                    visitor.external_session_id.clone_from(&ids.external_session_id);
                }
            }
        }

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::Value::Object(visitor.fields).to_string());

        self.sink.insert(&LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_owned(),
            message: visitor.message.unwrap_or_default(),
            fields,
            session_id: visitor.session_id,
            external_session_id: visitor.external_session_id,
        });
    }
}
