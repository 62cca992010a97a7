use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use scriptflow_core::{RateCategory, RateLimitDecision, RateLimitPolicy, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::{
    error::{error_body, ApiError, InternalErrorMarker, REDACTED_MESSAGE},
    metrics::RATE_LIMIT_REJECTIONS_TOTAL,
    AppState,
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Security headers middleware
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// Replaces internal error messages with a generic one unless details are exposed.
pub async fn redact_internal_errors(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if state.settings.server.expose_error_details
        || response.extensions().get::<InternalErrorMarker>().is_none()
    {
        return response;
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(error_body("INTERNAL_ERROR", REDACTED_MESSAGE, None)),
    )
        .into_response()
}

/// Per-category admission state handed to [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    policy: RateLimitPolicy,
    category: RateCategory,
    enabled: bool,
}

impl RateLimitGuard {
    pub fn new(state: &AppState, category: RateCategory) -> Self {
        Self {
            limiter: state.limiter.clone(),
            policy: state.policy(category),
            category,
            enabled: state.settings.rate_limit.enabled,
        }
    }
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    let reset_at = Utc::now()
        + chrono::Duration::from_std(decision.reset_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
    if let Ok(value) = HeaderValue::from_str(&reset_at.to_rfc3339()) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(guard): State<RateLimitGuard>,
    req: Request,
    next: Next,
) -> Response {
    if !guard.enabled {
        return next.run(req).await;
    }

    let client_ip = extract_client_ip(&req);
    let key = guard.category.key(&client_ip);
    let decision = guard.limiter.check(&key, &guard.policy);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs().unwrap_or(1);
        RATE_LIMIT_REJECTIONS_TOTAL
            .with_label_values(&[guard.category.as_str()])
            .inc();
        warn!(
            ip = %client_ip,
            category = %guard.category,
            path = %req.uri().path(),
            retry_after,
            "Rate limit exceeded"
        );
        let mut response = ApiError::RateLimited { retry_after }.into_response();
        apply_rate_limit_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    debug!(key = %key, remaining = decision.remaining, "Request admitted");
    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Extract client IP address from request
pub fn extract_client_ip<B>(req: &axum::http::Request<B>) -> String {
    if let Some(forwarded) = req.headers().get("X-Forwarded-For") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip = ip_str.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    "unknown".to_string()
}

/// CORS configuration for the configured origins. `*` allows any origin without credentials.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            X_RATELIMIT_LIMIT,
            X_RATELIMIT_REMAINING,
            X_RATELIMIT_RESET,
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(86400));

    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
