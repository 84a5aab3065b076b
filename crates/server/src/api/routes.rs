use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{downloads, handlers, middleware::metrics_middleware, progress};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Listing and downloads
        .route("/list", post(downloads::list))
        .route("/download/{id}", get(downloads::download_one))
        .route("/download-all", post(downloads::download_all))
        // Progress
        .route("/progress", post(progress::query_progress))
        .route("/progress/{id}", get(progress::get_progress));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // The browser client calls the API cross-origin
        .layer(CorsLayer::permissive())
}
