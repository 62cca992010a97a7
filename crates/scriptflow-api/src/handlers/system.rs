use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    Json,
};
use scriptflow_ai::{ConversionRequest, ConversionResponse};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    metrics,
    response::{ApiResponse, API_VERSION},
    AppState,
};

pub async fn health(State(state): State<AppState>) -> ApiResponse<Value> {
    let stats = state.coordinator.queue_stats();
    ApiResponse::ok(json!({
        "status": "healthy",
        "version": API_VERSION,
        "environment": state.settings.server.environment,
        "queue": {
            "mode": state.queue().settings().mode,
            "workerRunning": state.queue().worker_running(),
            "stats": stats,
        },
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    metrics::record_queue_stats(&state.coordinator.queue_stats());
    let body = metrics::render().map_err(ApiError::Internal)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}

pub async fn queue_stats(State(state): State<AppState>, _user: AuthUser) -> ApiResponse<Value> {
    let queue = state.queue();
    ApiResponse::ok(json!({
        "stats": queue.stats(),
        "pending": queue.pending_len(),
        "mode": queue.settings().mode,
    }))
}

/// Forward a raw script to the conversion service.
pub async fn convert_script(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<ConversionRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<ConversionResponse>> {
    let Json(request) = payload?;
    if request.raw_content.trim().is_empty() {
        return Err(ApiError::validation("raw_content must not be empty"));
    }
    info!(user_id = %user.id, file_id = %request.file_id, "Converting script");
    let response = state.converter.convert_script(&request).await?;
    Ok(ApiResponse::ok(response))
}
