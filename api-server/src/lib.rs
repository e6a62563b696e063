//! Agent Exchange API server
//!
//! REST endpoints for jobs and agents, an SSE streaming endpoint, and a
//! WebSocket endpoint speaking the execute/subscribe protocol. Every
//! request resolves a tenant from headers (absence means `default`);
//! cross-tenant reads require the admin marker.

pub mod error;
pub mod handlers;
pub mod sse;
pub mod state;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Build the full router over an application state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/:id", get(handlers::get_agent))
        .route("/agents/:id/run", post(handlers::run_agent))
        .route("/agents/:id/stream", post(sse::stream_agent))
        .route("/external-agents", get(handlers::list_external_agents))
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/provenance/runs/:run_id", get(handlers::run_provenance))
        .route("/policies", get(handlers::list_policies))
        .route("/ws", get(ws::websocket_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
