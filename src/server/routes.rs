//! Route definitions.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/cache", get(handlers::cached_index))
        .route("/cache/:bookmark", get(handlers::cache_listing_by_name))
        .route("/cache/:bookmark/:filename", get(handlers::cache_file_by_name))
        .route("/records/bookmarks", post(handlers::create_bookmark))
        .route("/records/:id", delete(handlers::delete_record))
        .route("/records/:id/cache", get(handlers::cache_listing))
        .route("/records/:id/cache/status", get(handlers::cache_status))
        .route("/records/:id/cache/:filename", get(handlers::cache_file))
}
