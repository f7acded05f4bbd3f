//! Notebrief Search - Retriever backends
//!
//! Each backend turns a query into ranked [`SearchHit`]s from a managed
//! search service:
//! - [`AzureSearchRetriever`]: Azure AI Search index over blob storage
//! - [`VertexSearchRetriever`]: Vertex AI Search (Discovery Engine)
//! - [`BedrockKnowledgeBaseRetriever`]: Amazon Bedrock Knowledge Bases
//!
//! [`SearchHit`]: notebrief_core::SearchHit

pub mod azure;
pub mod bedrock;
pub mod vertex;

pub use azure::AzureSearchRetriever;
pub use bedrock::BedrockKnowledgeBaseRetriever;
pub use vertex::VertexSearchRetriever;

use notebrief_core::{AppConfig, Backend, ResilientClient, Result, Retriever};

/// Create the retriever for the configured backend
pub fn create_retriever(config: &AppConfig, client: ResilientClient) -> Result<Box<dyn Retriever>> {
    match config.backend {
        Backend::Azure => Ok(Box::new(AzureSearchRetriever::from_config(
            &config.azure,
            client,
        )?)),
        Backend::Gcp => Ok(Box::new(VertexSearchRetriever::from_config(
            &config.gcp,
            client,
        )?)),
        Backend::Aws => Ok(Box::new(BedrockKnowledgeBaseRetriever::from_config(
            &config.aws,
            client,
        )?)),
    }
}

/// Non-empty string value of a JSON field
pub(crate) fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factory_selects_backend() {
        let mut config = AppConfig::default().with_backend(Backend::Azure);
        config.azure.search_endpoint = Some("https://search.example".to_string());
        config.azure.search_index = Some("notes".to_string());
        config.azure.search_api_key = Some("key".to_string());

        let retriever = create_retriever(&config, ResilientClient::default()).unwrap();
        assert_eq!(retriever.name(), "azure-ai-search");

        let aws = AppConfig::default().with_backend(Backend::Aws);
        assert!(create_retriever(&aws, ResilientClient::default()).is_err());
    }

    #[test]
    fn test_string_field_skips_blank_and_non_strings() {
        let value = json!({"a": "x", "b": "  ", "c": 3});
        assert_eq!(string_field(&value, "a").as_deref(), Some("x"));
        assert!(string_field(&value, "b").is_none());
        assert!(string_field(&value, "c").is_none());
        assert!(string_field(&value, "missing").is_none());
    }
}
