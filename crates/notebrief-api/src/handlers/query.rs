//! JSON query handler

use super::{query_field, run_pipeline, SummaryResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

/// Query request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Question about the notes
    #[schema(example = "今週は何をしていた？")]
    pub query: String,
}

/// Summarize notes relevant to a query
#[utoipa::path(
    post,
    path = "/api/v1/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Summary generated", body = SummaryResponse),
        (status = 400, description = "Query missing or empty", body = crate::error::ApiError),
        (status = 500, description = "Retrieval or generation failed", body = crate::error::ApiError)
    )
)]
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SummaryResponse>, AppError> {
    let query = payload
        .ok()
        .and_then(|Json(body)| query_field(&body).map(str::to_string))
        .ok_or_else(|| AppError::BadRequest("Query is required".to_string()))?;

    tracing::info!(chars = query.chars().count(), "query received");
    Ok(Json(run_pipeline(&state, &query).await?))
}
