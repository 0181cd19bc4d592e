//! Axum router configuration with middleware.
//!
//! All REST routes are under `/api/v1/`. This surface is operator/job-worker
//! facing (spec.md §1): authentication, project/membership management, and
//! the browser UI are out-of-scope external collaborators that would sit in
//! front of this router in a full deployment.
//!
//! Middleware: permissive CORS (no browser-facing origin policy to enforce
//! at this layer) and request tracing.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_routes = Router::new()
        .merge(handlers::workflow_routes())
        .merge(handlers::campaign_routes())
        .merge(handlers::event_routes())
        .merge(handlers::activity_routes());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness check (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
