//! HTTP routes for the status endpoint

pub mod health;
pub mod status;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the status router
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1", status::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
