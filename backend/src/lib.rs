//! Sluice backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::HeaderValue;
use axum::http::{header, HeaderName, Method};
use axum::{
    routing::{get, post},
    Json, Router,
};
use sluice_types::{SESSION_ID_HEADER, SSE_PATH};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub mod api;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod openapi;
pub mod resources;
pub mod state;
pub mod tls;

use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app() -> Router {
    create_app_with_state(AppState::default())
}

/// Create the Axum application router with a given state.
pub fn create_app_with_state(state: AppState) -> Router {
    create_app_with_config(state, Vec::new())
}

/// Create the Axum application router with a given state and CORS origins.
///
/// If `cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app_with_config(state: AppState, cors_allowed_origins: Vec<String>) -> Router {
    Router::new()
        .route("/", get(api::health::server_info))
        .route("/health", get(api::health::health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route(
            SSE_PATH,
            get(api::sse::sse_get)
                .post(api::sse::sse_post)
                .delete(api::sse::sse_delete),
        )
        .route(
            "/sse/{session_id}",
            post(api::sse::sse_post_by_path)
                .get(api::sse::sse_get_by_path)
                .delete(api::sse::sse_delete_by_path),
        )
        .layer(TraceLayer::new_for_http())
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::CACHE_CONTROL,
                    HeaderName::from_static(SESSION_ID_HEADER),
                ])
                .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]);

            // If no origins specified, allow any origin
            // Otherwise, restrict to the specified origins
            if cors_allowed_origins.is_empty() {
                cors.allow_origin(Any)
            } else {
                let origins: Vec<HeaderValue> = cors_allowed_origins
                    .iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            }
        })
        .with_state(state)
}

/// Serve the OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}
