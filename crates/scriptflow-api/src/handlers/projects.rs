use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};
use scriptflow_core::{Project, ProjectId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{auth::AuthUser, error::ApiResult, response::ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Project>> {
    let Json(request) = payload?;
    let project = state
        .coordinator
        .create_project(user.id, request.title, request.description, request.content)
        .await?;
    Ok(ApiResponse::created(project))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<ProjectId>, PathRejection>,
) -> ApiResult<ApiResponse<Project>> {
    let Path(id) = id?;
    let project = state.coordinator.get_project(user.id, id).await?;
    Ok(ApiResponse::ok(project))
}

pub async fn project_status(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<ProjectId>, PathRejection>,
) -> ApiResult<ApiResponse<Value>> {
    let Path(id) = id?;
    let overview = state.coordinator.project_overview(user.id, id).await?;
    Ok(ApiResponse::ok(json!({
        "projectId": overview.project.id,
        "workflowStatus": overview.project.workflow_status,
        "latestVersion": overview.latest_version,
        "diagnosticReport": overview.diagnostic_report,
        "decisions": overview.decision_count,
        "updatedAt": overview.project.updated_at,
    })))
}

pub async fn project_decisions(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<ProjectId>, PathRejection>,
) -> ApiResult<ApiResponse<Value>> {
    let Path(id) = id?;
    let summary = state.coordinator.decision_summary(user.id, id).await?;
    Ok(ApiResponse::ok(json!({
        "decisions": summary.decisions,
        "statistics": {
            "total": summary.total,
            "byAct": summary.by_act,
        },
    })))
}
