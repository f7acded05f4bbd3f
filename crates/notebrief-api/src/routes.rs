//! API route definitions

use crate::handlers::{azure, lambda, query};
use crate::state::AppState;
use axum::{routing::post, Router};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().route("/query", post(query::query_handler))
}

/// Routes shaped for serverless front ends
///
/// Azure Functions custom handlers forward `/api/<function>`; the Lambda
/// route takes the raw invocation event.
pub fn function_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/function_app", post(azure::function_app_handler))
        .route("/lambda/invoke", post(lambda::lambda_handler))
}
