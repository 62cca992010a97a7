use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::header,
    response::IntoResponse,
    Json,
};
use scriptflow_core::{JobId, JobStatus, ProjectId};
use scriptflow_queue::{JobView, ProcessOutcome};
use scriptflow_workflow::{IterationRequest, SynthesisOptions, SynthesisStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{auth::AuthUser, error::ApiResult, response::ApiResponse, AppState};

/// Terminal jobs never change again, so clients may cache them for an hour.
pub fn job_cache_control(status: JobStatus) -> &'static str {
    if status.is_terminal() {
        "public, max-age=3600"
    } else {
        "no-cache"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub project_id: ProjectId,
    #[serde(default)]
    pub script_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeRequest {
    pub project_id: ProjectId,
    #[serde(default)]
    pub options: SynthesisOptions,
}

pub async fn submit_analysis(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Value>> {
    let Json(request) = payload?;
    let job_id = state
        .coordinator
        .submit_analysis(user.id, request.project_id, request.script_content)
        .await?;
    Ok(ApiResponse::accepted(json!({
        "analysisId": job_id,
        "jobId": job_id,
        "projectId": request.project_id,
        "status": "processing",
        "message": "Analysis started successfully",
    })))
}

/// Advance the queue by at most one job.
pub async fn process_queue(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<ApiResponse<ProcessOutcome>> {
    Ok(ApiResponse::ok(state.coordinator.process_next().await))
}

async fn job_response(state: &AppState, user: &AuthUser, job_id: JobId) -> ApiResult<impl IntoResponse> {
    let view: JobView = state.coordinator.get_job_status(user.id, job_id).await?;
    let cache = job_cache_control(view.status);
    Ok(([(header::CACHE_CONTROL, cache)], ApiResponse::ok(view)))
}

pub async fn get_analysis_status(
    State(state): State<AppState>,
    user: AuthUser,
    job_id: Result<Path<JobId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(job_id) = job_id?;
    job_response(&state, &user, job_id).await
}

pub async fn propose_iteration(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<IterationRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Value>> {
    let Json(request) = payload?;
    let job_id = state.coordinator.submit_iteration(user.id, request).await?;
    Ok(ApiResponse::ok(json!({
        "jobId": job_id,
        "message": "Proposal generation started; poll the job status for results",
    })))
}

pub async fn get_iteration_job(
    State(state): State<AppState>,
    user: AuthUser,
    job_id: Result<Path<JobId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(job_id) = job_id?;
    job_response(&state, &user, job_id).await
}

pub async fn request_synthesis(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<SynthesizeRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Value>> {
    let Json(request) = payload?;
    let job_id = state
        .coordinator
        .request_synthesis(user.id, request.project_id, request.options)
        .await?;
    Ok(ApiResponse::ok(json!({
        "jobId": job_id,
        "status": JobStatus::Queued,
        "message": "Synthesis job queued successfully",
    })))
}

pub async fn get_synthesis_status(
    State(state): State<AppState>,
    user: AuthUser,
    job_id: Result<Path<JobId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(job_id) = job_id?;
    let status: SynthesisStatus = state
        .coordinator
        .get_synthesis_status(user.id, job_id)
        .await?;
    let cache = job_cache_control(status.status);
    Ok(([(header::CACHE_CONTROL, cache)], ApiResponse::ok(status)))
}
