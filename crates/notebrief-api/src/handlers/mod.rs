//! API handlers
//!
//! Every transport runs the same pipeline; handlers only differ in how the
//! query arrives and how the answer and errors are framed.

pub mod azure;
pub mod health;
pub mod lambda;
pub mod query;

use crate::error::AppError;
use crate::state::AppState;
use notebrief_core::{RetrievedDocument, Summary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Source document in a summary response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceDocument {
    #[schema(example = "月曜日はジムに行った。")]
    pub content: String,
    #[schema(example = "2024-05-06.md")]
    pub filename: String,
    #[schema(example = "https://storage.example/notes/2024-05-06.md")]
    pub url: String,
    #[schema(example = "2024-05-06T21:00:00Z")]
    pub date: String,
}

impl From<RetrievedDocument> for SourceDocument {
    fn from(doc: RetrievedDocument) -> Self {
        Self {
            content: doc.content,
            filename: doc.filename,
            url: doc.url,
            date: doc.date,
        }
    }
}

/// Summary response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    /// Generated answer
    #[schema(example = "今週は運動と読書を中心に過ごしました。")]
    pub summary: String,

    /// Notes the answer was grounded on
    pub sources: Vec<SourceDocument>,
}

impl From<Summary> for SummaryResponse {
    fn from(summary: Summary) -> Self {
        Self {
            summary: summary.summary,
            sources: summary.sources.into_iter().map(SourceDocument::from).collect(),
        }
    }
}

/// Non-blank `query` string of a request body
pub(crate) fn query_field(body: &Value) -> Option<&str> {
    body.get("query")
        .and_then(|q| q.as_str())
        .filter(|q| !q.trim().is_empty())
}

/// Run the pipeline, logging failures at the request boundary
pub(crate) async fn run_pipeline(state: &AppState, query: &str) -> Result<SummaryResponse, AppError> {
    state.increment_requests();

    match state.pipeline.summarize(query).await {
        Ok(summary) => Ok(summary.into()),
        Err(err) => {
            if !err.is_client_error() {
                tracing::error!(error = %err, "summary pipeline failed");
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_field() {
        assert_eq!(query_field(&json!({"query": "今週"})), Some("今週"));
        assert!(query_field(&json!({"query": ""})).is_none());
        assert!(query_field(&json!({"query": "  "})).is_none());
        assert!(query_field(&json!({"query": 3})).is_none());
        assert!(query_field(&json!({"q": "x"})).is_none());
        assert!(query_field(&json!(["query"])).is_none());
    }
}
