use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Json, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt as _;
use scribe_core::{CancelOutcome, ContextId, GenerationParams, StreamEngine, StreamId, StreamSnapshot};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: StreamEngine,
}

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub context_id: String,
    #[serde(default)]
    pub parameters: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateStreamResponse {
    pub stream_id: StreamId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveStreamResponse {
    pub stream_id: Option<StreamId>,
}

/// Builds the HTTP router over an engine.
pub fn app(engine: StreamEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/streams", post(create_stream))
        .route("/streams/{id}", get(read_stream))
        .route("/streams/{id}/generate", post(generate))
        .route("/contexts/{context_id}/stream", get(active_stream))
        .route("/contexts/{context_id}/cancel", post(cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let context_id = request.context_id.trim();
    if context_id.is_empty() {
        return Err(ApiError::BadRequest("context_id must not be empty".into()));
    }
    let stream_id = state
        .engine
        .create_stream(ContextId::new(context_id), request.parameters)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateStreamResponse { stream_id })))
}

/// Starts generation and streams the text back as a chunked body.
///
/// Dropping the connection does not stop generation; the client resumes
/// through `GET /streams/{id}`.
async fn generate(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Response, ApiError> {
    let stream_id = StreamId::from(id);
    let live = state.engine.start(stream_id).await?;
    info!(stream_id = %stream_id, "live stream opened");

    let body = Body::from_stream(live.map(Ok::<Bytes, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn read_stream(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<StreamSnapshot>, ApiError> {
    Ok(Json(state.engine.read(StreamId::from(id)).await?))
}

async fn active_stream(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Result<Json<ActiveStreamResponse>, ApiError> {
    let stream_id = state.engine.active_stream(&ContextId::new(context_id)).await?;
    Ok(Json(ActiveStreamResponse { stream_id }))
}

async fn cancel(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Result<Json<CancelOutcome>, ApiError> {
    Ok(Json(state.engine.cancel(&ContextId::new(context_id)).await?))
}
