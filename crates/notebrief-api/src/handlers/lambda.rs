//! AWS Lambda proxy-integration handler
//!
//! Accepts an API Gateway proxy event (body as a JSON string, optionally
//! base64-encoded) or a bare `{"query": ...}` event from a direct invoke, and
//! always answers with a proxy result; the outcome lives in `statusCode`.

use super::{query_field, run_pipeline};
use crate::state::AppState;
use axum::{body::Bytes, extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Proxy-integration result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl LambdaResponse {
    fn json(status_code: u16, body: &impl Serialize) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body: serde_json::to_string(body).unwrap_or_default(),
        }
    }

    fn error(status_code: u16, message: &str) -> Self {
        Self::json(status_code, &json!({ "error": message }))
    }
}

/// Request payload carried by the event
fn event_payload(event: Value) -> Option<Value> {
    match event.get("body") {
        Some(Value::String(raw)) => {
            let encoded = event
                .get("isBase64Encoded")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let bytes = if encoded {
                STANDARD.decode(raw.trim()).ok()?
            } else {
                raw.clone().into_bytes()
            };
            serde_json::from_slice(&bytes).ok()
        }
        _ => Some(event),
    }
}

/// Lambda invocation endpoint
pub async fn lambda_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<LambdaResponse> {
    let query = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(event_payload)
        .and_then(|payload| query_field(&payload).map(str::to_string));

    let Some(query) = query else {
        return Json(LambdaResponse::error(400, "No query provided"));
    };

    let response = match run_pipeline(&state, &query).await {
        Ok(summary) => LambdaResponse::json(200, &summary),
        Err(err) => LambdaResponse::error(err.status().as_u16(), err.message()),
    };
    Json(response)
}
