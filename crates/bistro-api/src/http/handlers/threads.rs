//! Thread endpoints: turn streams, cancellation and checkpoint management.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use bistro_core::EngineError;
use bistro_core::checkpoint::ThreadInfo;
use bistro_core::stream::TurnHandle;
use bistro_types::conversation::{ConversationSummary, Node};
use bistro_types::event::TurnEvent;
use bistro_types::turn::Turn;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

const MAX_THREAD_ID_LEN: usize = 128;

/// Response header carrying the id of the turn a stream belongs to.
pub const TURN_ID_HEADER: &str = "x-turn-id";

/// Request body for `POST /threads/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Query of `POST /threads/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    /// Cancel this turn, queued or running, instead of the running one.
    pub turn: Option<String>,
}

/// Full view of one stored thread.
#[derive(Debug, Serialize)]
pub struct ThreadView {
    pub thread_id: String,
    pub node: Node,
    pub round_trips: u32,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversationSummary>,
    pub turns: Vec<Turn>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Thread ids are path segments and store keys: keep them short and plain.
pub fn validate_thread_id(thread_id: &str) -> Result<(), AppError> {
    if thread_id.is_empty() || thread_id.len() > MAX_THREAD_ID_LEN {
        return Err(AppError::Validation(format!(
            "thread id must be 1-{MAX_THREAD_ID_LEN} characters"
        )));
    }
    if !thread_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(AppError::Validation(
            "thread id may only contain letters, digits, '-', '_', '.' and ':'".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Turn streams
// ---------------------------------------------------------------------------

/// POST /api/v1/threads/{id}/messages
///
/// Submits one guest message and streams the turn's events as SSE. The
/// stream ends after `turn_complete` or `error`. A cancelled turn ends
/// without either. The turn id is returned in the `x-turn-id` header.
pub async fn send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_thread_id(&thread_id)?;
    let text = body.message.trim();
    if text.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    tracing::debug!(thread_id = %thread_id, chars = text.len(), "message received");
    Ok(turn_stream(state.engine.submit(thread_id, text)))
}

/// POST /api/v1/threads/{id}/resume
///
/// Continues a turn that was interrupted before reaching END.
pub async fn resume_turn(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validate_thread_id(&thread_id)?;
    let checkpoint = state
        .engine
        .orchestrator()
        .checkpointer()
        .restore(&thread_id)
        .await
        .map_err(EngineError::from)?;
    match checkpoint {
        None => return Err(EngineError::NotFound(thread_id).into()),
        Some(checkpoint) if checkpoint.node == Node::End => {
            return Err(EngineError::NothingToResume(thread_id).into());
        }
        Some(_) => {}
    }

    Ok(turn_stream(state.engine.resume(thread_id)))
}

/// Forward a turn's events as SSE, then report an engine error if the turn
/// task itself failed.
fn turn_stream(
    handle: TurnHandle,
) -> ([(&'static str, String); 1], Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let thread_id = handle.thread_id().to_string();
    let turn_id = handle.turn_id().to_string();
    let (events, task) = handle.into_stream();

    let sse_stream = async_stream::stream! {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            yield Ok::<_, Infallible>(sse_event(&event));
        }

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(EngineError::Aborted(err.to_string())),
        };
        if let Err(err) = outcome {
            tracing::warn!(thread_id = %thread_id, error = %err, "turn failed");
            let message = err.to_string();
            let (_, code) = AppError::from(err).status_and_code();
            let data = json!({ "type": "error", "code": code, "message": message });
            yield Ok(Event::default().event("error").data(data.to_string()));
        }
    };

    let sse = Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    ([(TURN_ID_HEADER, turn_id)], sse)
}

fn sse_event(event: &TurnEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        json!({ "type": "error", "message": format!("failed to encode event: {e}") }).to_string()
    });
    Event::default().event(event.name()).data(data)
}

// ---------------------------------------------------------------------------
// Control and management
// ---------------------------------------------------------------------------

/// POST /api/v1/threads/{id}/cancel
///
/// Without `?turn=` cancels the running turn. With it, cancels that turn
/// even while it waits behind another one. Returns `cancelled: false`
/// when there was nothing to cancel.
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<CancelParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    validate_thread_id(&thread_id)?;

    let cancelled = match &params.turn {
        Some(turn_id) => state.engine.cancel_turn(&thread_id, turn_id),
        None => state.engine.cancel(&thread_id),
    };
    if cancelled {
        tracing::info!(thread_id = %thread_id, turn_id = ?params.turn, "turn cancelled by caller");
    }
    Ok(Json(ApiResponse::success(
        json!({ "thread_id": thread_id, "turn_id": params.turn, "cancelled": cancelled }),
        start,
    )))
}

/// GET /api/v1/threads/{id}
pub async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<ThreadView>>, AppError> {
    let start = Instant::now();
    validate_thread_id(&thread_id)?;

    let checkpoint = state
        .engine
        .orchestrator()
        .checkpointer()
        .restore(&thread_id)
        .await
        .map_err(EngineError::from)?
        .ok_or_else(|| EngineError::NotFound(thread_id.clone()))?;

    let view = ThreadView {
        busy: state.engine.is_busy(&thread_id),
        thread_id: checkpoint.thread_id,
        node: checkpoint.node,
        round_trips: checkpoint.round_trips,
        summary: checkpoint.conversation.summary,
        turns: checkpoint.conversation.turns,
        updated_at: checkpoint.updated_at,
    };
    let link = format!("/api/v1/threads/{thread_id}/messages");
    Ok(Json(ApiResponse::success(view, start).with_link("messages", link)))
}

/// DELETE /api/v1/threads/{id}
pub async fn retire_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    validate_thread_id(&thread_id)?;

    if !state.engine.retire(&thread_id).await? {
        return Err(EngineError::NotFound(thread_id).into());
    }
    tracing::info!(thread_id = %thread_id, "thread retired");
    Ok(Json(ApiResponse::success(
        json!({ "thread_id": thread_id, "retired": true }),
        start,
    )))
}

/// GET /api/v1/threads
///
/// Most recently updated first.
pub async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ThreadInfo>>>, AppError> {
    let start = Instant::now();
    let threads = state.engine.threads().await?;
    Ok(Json(ApiResponse::success(threads, start)))
}
