//! Azure Functions custom handler
//!
//! Errors are returned as plain text, successes as UTF-8 JSON.

use super::{query_field, run_pipeline};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

pub const QUERY_NOT_PROVIDED: &str = "Query not provided";

/// Function App HTTP trigger
pub async fn function_app_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let query = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|body| query_field(&body).map(str::to_string));

    let Some(query) = query else {
        return plain_text(StatusCode::BAD_REQUEST, QUERY_NOT_PROVIDED.to_string());
    };

    match run_pipeline(&state, &query).await {
        Ok(response) => {
            tracing::info!(sources = response.sources.len(), "function response ready");
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => plain_text(err.status(), err.message().to_string()),
    }
}

fn plain_text(status: StatusCode, message: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}
