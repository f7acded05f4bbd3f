//! Vertex AI Search retriever
//!
//! Calls the Discovery Engine `servingConfigs/default_search:search` method
//! and flattens extractive answers (or snippets) into hit content.

use async_trait::async_trait;
use notebrief_core::auth::{GoogleTokenProvider, ServiceAccountKey};
use notebrief_core::{
    ConfigError, GcpConfig, NotebriefError, ResilientClient, Result, Retriever, SearchHit,
};
use serde::Serialize;
use serde_json::Value;

use crate::string_field;

const SERVICE: &str = "vertex-ai-search";

/// Vertex AI Search client for one data store or search app
pub struct VertexSearchRetriever {
    client: ResilientClient,
    tokens: GoogleTokenProvider,
    base_url: String,
    serving_config: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    page_size: usize,
    content_search_spec: ContentSearchSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentSearchSpec {
    snippet_spec: SnippetSpec,
    extractive_content_spec: ExtractiveContentSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnippetSpec {
    return_snippet: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractiveContentSpec {
    max_extractive_answer_count: u32,
}

impl VertexSearchRetriever {
    /// `serving_config` is the resource path ending in `servingConfigs/default_search`
    pub fn new(
        client: ResilientClient,
        tokens: GoogleTokenProvider,
        location_id: &str,
        serving_config: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            base_url: discovery_engine_host(location_id),
            serving_config: serving_config.into(),
        }
    }

    /// Point requests at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create from config
    ///
    /// Uses `GCP_ACCESS_TOKEN` when present, otherwise mints tokens from the
    /// service-account key at `credentials_path`.
    pub fn from_config(config: &GcpConfig, client: ResilientClient) -> Result<Self> {
        let project_id = config
            .project_id
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired(vec!["GCP_PROJECT_ID".to_string()]))?;

        let parent = format!(
            "projects/{}/locations/{}/collections/default_collection",
            project_id, config.location_id
        );
        let serving_config = match (&config.search_engine_id, &config.data_store_id) {
            (Some(engine), _) => {
                format!("{parent}/engines/{engine}/servingConfigs/default_search")
            }
            (None, Some(data_store)) => {
                format!("{parent}/dataStores/{data_store}/servingConfigs/default_search")
            }
            (None, None) => {
                return Err(ConfigError::MissingRequired(vec![
                    "VERTEX_SEARCH_DATA_STORE_ID".to_string(),
                ])
                .into())
            }
        };

        let tokens = match &config.access_token {
            Some(token) => GoogleTokenProvider::from_token(token.clone()),
            None => {
                let key = ServiceAccountKey::from_file(&config.credentials_path)?;
                GoogleTokenProvider::from_service_account(key, client.clone())
            }
        };

        Ok(Self::new(client, tokens, &config.location_id, serving_config))
    }

    fn search_url(&self) -> String {
        format!("{}/v1/{}:search", self.base_url, self.serving_config)
    }
}

/// Regional locations have their own endpoint
fn discovery_engine_host(location_id: &str) -> String {
    if location_id == "global" {
        "https://discoveryengine.googleapis.com".to_string()
    } else {
        format!("https://{location_id}-discoveryengine.googleapis.com")
    }
}

#[async_trait]
impl Retriever for VertexSearchRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let token = self.tokens.access_token().await?;
        let request = SearchRequest {
            query,
            page_size: limit,
            content_search_spec: ContentSearchSpec {
                snippet_spec: SnippetSpec {
                    return_snippet: true,
                },
                extractive_content_spec: ExtractiveContentSpec {
                    max_extractive_answer_count: 1,
                },
            },
        };

        let response = self
            .client
            .post(self.search_url())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotebriefError::upstream(SERVICE, status.as_u16(), body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| NotebriefError::malformed(SERVICE, e.to_string()))?;

        // An empty result set omits `results` entirely
        let hits: Vec<SearchHit> = body
            .get("results")
            .and_then(|r| r.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r.get("document"))
                    .take(limit)
                    .map(parse_document)
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(hits = hits.len(), "vertex search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "vertex-ai-search"
    }
}

fn parse_document(doc: &Value) -> SearchHit {
    let structured = doc.get("structData").unwrap_or(&Value::Null);
    let derived = doc.get("derivedStructData").unwrap_or(&Value::Null);

    SearchHit {
        content: document_text(derived),
        filename: string_field(structured, "filename").or_else(|| string_field(derived, "title")),
        url: string_field(derived, "link").or_else(|| string_field(structured, "link")),
        date: string_field(structured, "date"),
        score: None,
    }
}

/// Extractive answers first, then snippets
fn document_text(derived: &Value) -> String {
    for (list, field) in [
        ("extractive_answers", "content"),
        ("extractive_segments", "content"),
        ("snippets", "snippet"),
    ] {
        let parts: Vec<&str> = derived
            .get(list)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(field).and_then(|c| c.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if !parts.is_empty() {
            return parts.join("\n");
        }
    }
    String::new()
}
