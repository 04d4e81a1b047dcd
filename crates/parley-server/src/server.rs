use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::agent::AgentRuntime;
use parley_core::summarizer::Summarizer;
use parley_engine::TurnController;
use parley_store::SessionStore;
use parley_telemetry::SqliteLogSink;

use crate::config::ServerConfig;
use crate::handlers;
use crate::orchestrator::ChatOrchestrator;

/// Headers must be sent within this window. Streaming bodies are not
/// affected once the response has started.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub chat: Arc<ChatOrchestrator>,
    /// Persisted warn+ logs, when telemetry keeps them.
    pub logs: Option<Arc<SqliteLogSink>>,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let controller = Arc::new(TurnController::new(
            Arc::clone(&store),
            runtime,
            summarizer,
            config.compaction.clone(),
        ));
        let chat = Arc::new(ChatOrchestrator::new(controller, config.turn_timeout, config.event_buffer));
        Self {
            store,
            chat,
            logs: None,
        }
    }

    pub fn with_logs(mut self, logs: Option<Arc<SqliteLogSink>>) -> Self {
        self.logs = logs;
        self
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session)
                .put(handlers::update_session)
                .delete(handlers::delete_session),
        )
        .route("/api/sessions/{id}/messages", delete(handlers::clear_messages))
        .route("/api/sessions/{id}/stats", get(handlers::message_stats))
        .route(
            "/api/sessions/{id}/documents",
            get(handlers::list_documents).post(handlers::add_document),
        )
        .route("/api/chat/stream", post(handlers::chat_stream))
        .route("/api/chat/abort", post(handlers::abort_chat))
        .route("/api/logs", get(handlers::list_logs))
        .with_state(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(12 * 60 * 60))
}

/// Bind and serve. Returns a handle to shut the server down.
pub async fn start(config: &ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let chat = Arc::clone(&state.chat);
    let router = build_router(state, &config.allowed_origins);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "parley server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            warn!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        chat,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    chat: Arc<ChatOrchestrator>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, cancel delivery for running turns and
    /// wait for open connections to close.
    pub async fn shutdown(self) {
        let aborted = self.chat.abort_all();
        info!(aborted, "shutting down");
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task failed");
        }
    }
}
