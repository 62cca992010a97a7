use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": API_VERSION,
    })
}

/// Success envelope: `{success: true, data, meta}`.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }

    pub fn accepted(data: T) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = json!({
            "success": true,
            "data": self.data,
            "meta": meta(),
        });
        (self.status, Json(body)).into_response()
    }
}
