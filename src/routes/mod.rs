pub mod error;
pub mod health;
pub mod images;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;

use crate::app_state::AppState;

/// Largest accepted request body: the authenticated upload limit plus
/// room for the other multipart fields.
pub const MAX_REQUEST_BYTES: usize = 11 * 1024 * 1024;

/// API and health routes. `/metrics` is mounted separately by the server
/// since it carries its own state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/images",
            get(images::list_images).post(images::submit_image),
        )
        .route("/api/v1/images/{job_id}", get(images::get_image))
        .route(
            "/api/v1/images/{job_id}/download",
            get(images::download_image),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .with_state(state)
}
