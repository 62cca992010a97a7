use crate::{
    auth::require_auth,
    handlers, metrics,
    middleware::{
        cors_layer, rate_limit_middleware, redact_internal_errors, security_headers_middleware,
        RateLimitGuard,
    },
    AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use scriptflow_core::RateCategory;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (scripts included).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn auth_routes(state: &AppState) -> Router<AppState> {
    let register = Router::new()
        .route("/api/auth/register", post(handlers::register))
        .layer(from_fn_with_state(
            RateLimitGuard::new(state, RateCategory::Registration),
            rate_limit_middleware,
        ));
    let login = Router::new()
        .route("/api/auth/login", post(handlers::login))
        .layer(from_fn_with_state(
            RateLimitGuard::new(state, RateCategory::Auth),
            rate_limit_middleware,
        ));
    register.merge(login)
}

fn v1_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Projects
        .route("/api/v1/projects", post(handlers::create_project))
        .route("/api/v1/projects/{id}", get(handlers::get_project))
        .route("/api/v1/projects/{id}/status", get(handlers::project_status))
        .route("/api/v1/projects/{id}/decisions", get(handlers::project_decisions))
        // Analysis
        .route("/api/v1/analyze", post(handlers::submit_analysis))
        .route("/api/v1/analyze/process", post(handlers::process_queue))
        .route("/api/v1/analyze/{job_id}", get(handlers::get_analysis_status))
        // Iteration
        .route("/api/v1/iteration/propose", post(handlers::propose_iteration))
        .route("/api/v1/iteration/jobs/{job_id}", get(handlers::get_iteration_job))
        // Synthesis
        .route("/api/v1/synthesize", post(handlers::request_synthesis))
        .route(
            "/api/v1/synthesize/{job_id}/status",
            get(handlers::get_synthesis_status),
        )
        // Queue and conversion
        .route("/api/v1/queue/stats", get(handlers::queue_stats))
        .route("/api/v1/convert/script", post(handlers::convert_script))
        // Rate limiting runs before authentication
        .layer(from_fn_with_state(state.clone(), require_auth))
        .layer(from_fn_with_state(
            RateLimitGuard::new(state, RateCategory::Api),
            rate_limit_middleware,
        ))
}

pub fn create_router(state: AppState) -> Router {
    metrics::register_metrics();
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(auth_routes(&state))
        .merge(v1_routes(&state))
        .layer(from_fn_with_state(state.clone(), redact_internal_errors))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.settings.server.allowed_origins))
                .layer(from_fn(security_headers_middleware))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
