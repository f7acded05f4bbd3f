//! Notebrief API - HTTP server
//!
//! Exposes the summary pipeline as a JSON endpoint, an Azure Functions
//! custom handler and a Lambda proxy-integration endpoint.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, middleware::from_fn, routing::get, Json, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// OpenAPI document
#[derive(OpenApi)]
#[openapi(
    info(title = "Notebrief API", description = "Summaries of daily notes"),
    paths(
        handlers::query::query_handler,
        handlers::health::health_check,
        handlers::health::readiness_check
    ),
    components(schemas(
        handlers::query::QueryRequest,
        handlers::SummaryResponse,
        handlers::SourceDocument,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        error::ApiError
    )),
    tags(
        (name = "query", description = "Note summaries"),
        (name = "health", description = "Probes")
    )
)]
pub struct ApiDoc;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", routes::api_routes())
        .merge(routes::function_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::request_id_middleware));

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// CORS is only enabled when origins are configured; `*` allows any
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(layer.allow_origin(allowed))
}
