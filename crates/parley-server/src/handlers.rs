use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use parley_core::events::OutboundEvent;
use parley_core::ids::{DocumentId, SessionId};
use parley_core::session::{Document, NewDocument, Session};
use parley_engine::TurnRequest;
use parley_telemetry::LogQuery;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionBody {
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub session_id: SessionId,
    pub message: String,
    #[serde(default)]
    pub document_ids: Vec<DocumentId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortBody {
    pub session_id: SessionId,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.store.list_sessions()?))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = state.store.create_session(body.title.as_deref())?;
    info!(session_id = %session.id, "session created");
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SessionId::from_raw(id);
    let session = state.store.get_session(&id)?;
    let messages = state.store.get_messages(&id)?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionBody>,
) -> Result<Json<Value>, ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    state.store.update_title(&SessionId::from_raw(id), title)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SessionId::from_raw(id);
    state.chat.abort(&id);
    state.store.delete_session(&id)?;
    info!(session_id = %id, "session deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn clear_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SessionId::from_raw(id);
    state.store.get_session(&id)?;
    if state.chat.is_active(&id) {
        return Err(ApiError::Conflict(format!("session {id} has an active turn")));
    }
    let deleted = state.store.clear_messages(&id)?;
    Ok(Json(json!({ "success": true, "message": "Messages cleared", "deleted": deleted })))
}

pub async fn message_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SessionId::from_raw(id);
    state.store.get_session(&id)?;
    let count = state.store.count_messages(&id)?;
    Ok(Json(json!({ "message_count": count })))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let id = SessionId::from_raw(id);
    state.store.get_session(&id)?;
    Ok(Json(state.store.list_documents(&id)?))
}

pub async fn add_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NewDocument>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    if body.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename is required".into()));
    }
    let document = state.store.add_document(&SessionId::from_raw(id), body)?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Run one chat turn and stream its events as SSE. Closing the connection
/// cancels delivery; the turn still finishes server-side.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    state.store.get_session(&body.session_id)?;

    let session_id = body.session_id.clone();
    let turn = state
        .chat
        .start_turn(TurnRequest {
            session_id: body.session_id,
            message: body.message,
            document_ids: body.document_ids,
        })
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    info!(session_id = %session_id, "chat turn started");

    let guard = turn.cancel.drop_guard();
    let stream = ReceiverStream::new(turn.events).map(move |event| {
        let _connected = &guard;
        Ok(sse_event(&event))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn abort_chat(
    State(state): State<AppState>,
    Json(body): Json<AbortBody>,
) -> Json<Value> {
    let aborted = state.chat.abort(&body.session_id);
    if aborted {
        info!(session_id = %body.session_id, "turn aborted by client");
    }
    Json(json!({ "aborted": aborted }))
}

/// Persisted warn+ logs, newest first.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(logs) = &state.logs else {
        return Err(ApiError::NotFound("log persistence is disabled".into()));
    };
    let records = logs.query(&query)?;
    let total = logs.count()?;
    Ok(Json(json!({ "total": total, "records": records })))
}

fn sse_event(event: &OutboundEvent) -> Event {
    Event::default().event(event.name()).data(event.data().to_string())
}
