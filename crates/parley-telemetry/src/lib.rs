mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("log database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub log_level: Level,
    /// Per-module overrides, e.g. `("parley_llm", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    /// Persist warn+ events to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
    /// Persisted records older than this are pruned at startup.
    pub log_retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: data_dir().join("logs.db"),
            log_retention_days: 7,
        }
    }
}

impl TelemetryConfig {
    fn filter_directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        directives
    }
}

/// Keeps the log sink reachable for queries after startup.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// `None` when persistence is disabled or the log database failed to open.
    pub fn log_sink(&self) -> Option<Arc<SqliteLogSink>> {
        self.log_sink.clone()
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let log_sink = if config.log_to_sqlite {
        match SqliteLogSink::open(&config.log_db_path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("parley-telemetry: failed to open log database: {e}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .init();

    if let Some(sink) = &log_sink {
        prune_expired(sink, config.log_retention_days);
    }
    TelemetryGuard { log_sink }
}

fn prune_expired(sink: &SqliteLogSink, retention_days: u32) {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    match sink.prune_before(cutoff) {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, retention_days, "pruned persisted logs"),
        Err(e) => tracing::warn!(error = %e, "failed to prune persisted logs"),
    }
}

/// Default location for on-disk state: `$HOME/.parley`, or `/tmp/.parley`.
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_persists_to_data_dir() {
        let config = TelemetryConfig::default();
        assert!(config.log_to_sqlite);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.log_db_path.ends_with(".parley/logs.db"));
    }

    #[test]
    fn filter_directives_include_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("parley_llm".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(config.filter_directives(), "warn,parley_llm=debug");
    }

    #[test]
    fn guard_exposes_sink() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let guard = TelemetryGuard {
            log_sink: Some(sink.clone()),
        };
        assert!(guard.log_sink().is_some_and(|s| Arc::ptr_eq(&s, &sink)));
        assert!(TelemetryGuard { log_sink: None }.log_sink().is_none());
    }

    #[test]
    fn log_query_reads_camel_case_params() {
        let q: LogQuery =
            serde_json::from_value(serde_json::json!({ "sessionId": "sess_a", "limit": 5 })).unwrap();
        assert_eq!(q.session_id.as_deref(), Some("sess_a"));
        assert_eq!(q.limit, Some(5));
        assert!(q.level.is_none());
    }
}
