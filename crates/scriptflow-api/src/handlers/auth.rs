use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::{DateTime, Utc};
use scriptflow_core::{NewUser, User, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    auth::{hash_password, verify_password},
    error::{ApiError, ApiResult},
    metrics::HTTP_AUTH_FAILURES_TOTAL,
    response::ApiResponse,
    validation::{is_valid_email, is_weak_password, password_problems, FieldErrors},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserSummary,
}

async fn blocking<T, F>(task: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ApiError::Internal(format!("Password task failed: {}", e)))?
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<UserSummary>> {
    let Json(request) = payload?;
    let email = request.email.trim().to_lowercase();
    let name = request.name.map(|n| n.trim().to_string());

    let mut errors = FieldErrors::default();
    if !is_valid_email(&email) {
        errors.add("email", "Invalid email format");
    }
    for problem in password_problems(&request.password) {
        errors.add("password", problem);
    }
    if let Some(name) = &name {
        if name.is_empty() {
            errors.add("name", "Name is required");
        } else if name.chars().count() > 100 {
            errors.add("name", "Name is too long");
        }
    }
    errors.into_result("Invalid registration data")?;

    if is_weak_password(&request.password) {
        return Err(ApiError::validation(
            "Password is too common or weak. Please choose a stronger password.",
        ));
    }
    if state.repository.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let password = request.password;
    let password_hash = blocking(move || hash_password(&password)).await?;
    let user = state
        .repository
        .create_user(NewUser {
            email,
            name,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, "User registered");
    Ok(ApiResponse::created(UserSummary::from(&user)))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<LoginResponse>> {
    let Json(request) = payload?;
    let email = request.email.trim().to_lowercase();
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    let Some(user) = state.repository.find_user_by_email(&email).await? else {
        HTTP_AUTH_FAILURES_TOTAL.inc();
        warn!("Login attempt for unknown account");
        return Err(invalid());
    };

    let password = request.password;
    let hash = user.password_hash.clone();
    let verified = blocking(move || Ok(verify_password(&password, &hash))).await?;
    if !verified {
        HTTP_AUTH_FAILURES_TOTAL.inc();
        warn!(user_id = %user.id, "Login failed: wrong password");
        return Err(invalid());
    }

    let issued = state.jwt.issue(&user)?;
    info!(user_id = %user.id, "User logged in");
    Ok(ApiResponse::ok(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserSummary::from(&user),
    }))
}
