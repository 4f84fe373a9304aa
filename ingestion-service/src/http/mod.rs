//! HTTP surface: uploads, image queries and plant aggregates.

pub mod error;
pub mod handlers;
pub mod upload;
pub mod validated_query;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::app::SharedAppState;

pub use error::ApiError;

pub fn router(state: SharedAppState, route_prefix: &str, max_upload_bytes: usize) -> Router {
    let routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/upload/file", post(handlers::upload_image_csv))
        .route("/images", get(handlers::get_images))
        .route("/plants", get(handlers::get_plants))
        .route("/plants/upload/file", post(handlers::upload_plant_sheet));

    let prefix = route_prefix.trim_end_matches('/');
    let routes = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };

    routes
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
