//! Azure AI Search retriever
//!
//! Queries an index built by the blob indexer, whose documents carry
//! `metadata_storage_*` fields next to the extracted `content`.

use async_trait::async_trait;
use notebrief_core::{
    AzureConfig, ConfigError, NotebriefError, ResilientClient, Result, Retriever, SearchHit,
};
use serde::Serialize;
use serde_json::Value;

use crate::string_field;

const SERVICE: &str = "azure-ai-search";

/// Azure AI Search index client
pub struct AzureSearchRetriever {
    client: ResilientClient,
    endpoint: String,
    index: String,
    api_key: String,
    api_version: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    search: &'a str,
    top: usize,
}

impl AzureSearchRetriever {
    pub fn new(
        client: ResilientClient,
        endpoint: impl Into<String>,
        index: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index: index.into(),
            api_key: api_key.into(),
            api_version: AzureConfig::default().search_api_version,
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Create from config
    pub fn from_config(config: &AzureConfig, client: ResilientClient) -> Result<Self> {
        let endpoint = config.search_url().ok_or_else(|| {
            ConfigError::MissingRequired(vec![
                "AZURE_AI_SEARCH_SERVICE_NAME or AZURE_SEARCH_ENDPOINT".to_string(),
            ])
        })?;
        let index = config
            .search_index
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired(vec!["AZURE_SEARCH_INDEX".to_string()]))?;
        let api_key = config.search_api_key.clone().ok_or_else(|| {
            ConfigError::MissingRequired(vec!["AZURE_SEARCH_API_KEY".to_string()])
        })?;

        Ok(Self::new(client, endpoint, index, api_key)
            .with_api_version(config.search_api_version.clone()))
    }

    fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, self.index, self.api_version
        )
    }
}

#[async_trait]
impl Retriever for AzureSearchRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(self.search_url())
            .header("api-key", &self.api_key)
            .json(&SearchRequest { search: query, top: limit })
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
        let values = body
            .get("value")
            .and_then(|v| v.as_array())
            .ok_or_else(|| NotebriefError::malformed(SERVICE, "missing `value` array"))?;

        let hits: Vec<SearchHit> = values.iter().take(limit).map(parse_document).collect();
        tracing::debug!(index = %self.index, hits = hits.len(), "azure search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "azure-ai-search"
    }
}

/// Indexed fields win over the serialized `metadata` blob some loaders write
fn parse_document(doc: &Value) -> SearchHit {
    let metadata = doc
        .get("metadata")
        .and_then(|m| m.as_str())
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .unwrap_or(Value::Null);

    let field = |key: &str| string_field(doc, key).or_else(|| string_field(&metadata, key));

    SearchHit {
        content: doc
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
        filename: field("metadata_storage_name"),
        url: field("metadata_storage_path"),
        date: field("metadata_storage_last_modified"),
        score: doc
            .get("@search.score")
            .and_then(|s| s.as_f64())
            .map(|s| s as f32),
    }
}
