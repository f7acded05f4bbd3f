//! Amazon Bedrock Knowledge Bases retriever
//!
//! Calls the `Retrieve` API of `bedrock-agent-runtime`, signed with SigV4.

use async_trait::async_trait;
use chrono::Utc;
use notebrief_core::auth::{AwsCredentials, SigV4Signer};
use notebrief_core::{
    AwsConfig, ConfigError, NotebriefError, ResilientClient, Result, Retriever, SearchHit,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::string_field;

const SERVICE: &str = "bedrock-knowledge-base";

/// Knowledge base retrieval client
pub struct BedrockKnowledgeBaseRetriever {
    client: ResilientClient,
    signer: SigV4Signer,
    base_url: String,
    knowledge_base_id: String,
    min_score: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    retrieval_query: RetrievalQuery<'a>,
    retrieval_configuration: RetrievalConfiguration,
}

#[derive(Debug, Serialize)]
struct RetrievalQuery<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalConfiguration {
    vector_search_configuration: VectorSearchConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VectorSearchConfiguration {
    number_of_results: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievalResult>,
}

#[derive(Debug, Deserialize)]
struct RetrievalResult {
    content: ResultContent,
    #[serde(default)]
    location: Value,
    #[serde(default)]
    metadata: Value,
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ResultContent {
    #[serde(default)]
    text: String,
}

impl BedrockKnowledgeBaseRetriever {
    pub fn new(
        client: ResilientClient,
        credentials: AwsCredentials,
        region: &str,
        knowledge_base_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            signer: SigV4Signer::new(credentials, region, "bedrock"),
            base_url: format!("https://bedrock-agent-runtime.{region}.amazonaws.com"),
            knowledge_base_id: knowledge_base_id.into(),
            min_score: AwsConfig::default().min_score,
        }
    }

    /// Drop hits scoring below this confidence
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Point requests at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create from config
    pub fn from_config(config: &AwsConfig, client: ResilientClient) -> Result<Self> {
        let knowledge_base_id = config
            .knowledge_base_id
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired(vec!["KB_ID".to_string()]))?;

        Ok(
            Self::new(client, aws_credentials(config)?, &config.region, knowledge_base_id)
                .with_min_score(config.min_score),
        )
    }

    fn retrieve_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/knowledgebases/{}/retrieve",
            self.base_url, self.knowledge_base_id
        );
        Url::parse(&raw).map_err(|e| anyhow::anyhow!("invalid retrieve url {raw}: {e}").into())
    }
}

/// Static credentials from config
pub fn aws_credentials(config: &AwsConfig) -> Result<AwsCredentials> {
    match (&config.access_key_id, &config.secret_access_key) {
        (Some(key), Some(secret)) => Ok(AwsCredentials::new(key.clone(), secret.clone())
            .with_session_token(config.session_token.clone())),
        _ => Err(ConfigError::MissingRequired(vec![
            "AWS_ACCESS_KEY_ID".to_string(),
            "AWS_SECRET_ACCESS_KEY".to_string(),
        ])
        .into()),
    }
}

#[async_trait]
impl Retriever for BedrockKnowledgeBaseRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = self.retrieve_url()?;
        let payload = serde_json::to_vec(&RetrieveRequest {
            retrieval_query: RetrievalQuery { text: query },
            retrieval_configuration: RetrievalConfiguration {
                vector_search_configuration: VectorSearchConfiguration {
                    number_of_results: limit,
                },
            },
        })
        .map_err(|e| anyhow::anyhow!("failed to encode retrieve request: {e}"))?;

        let mut request = self
            .client
            .post(url.clone())
            .header("content-type", "application/json");
        for (name, value) in self.signer.sign("POST", &url, &payload, Utc::now()) {
            request = request.header(name, &value);
        }

        let response = request.body(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotebriefError::upstream(SERVICE, status.as_u16(), body));
        }

        let body: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| NotebriefError::malformed(SERVICE, e.to_string()))?;

        let total = body.retrieval_results.len();
        let hits: Vec<SearchHit> = body
            .retrieval_results
            .into_iter()
            .filter(|r| r.score.map_or(true, |s| s >= self.min_score))
            .take(limit)
            .map(into_hit)
            .collect();

        tracing::debug!(
            knowledge_base = %self.knowledge_base_id,
            hits = hits.len(),
            dropped = total - hits.len(),
            "knowledge base retrieval complete"
        );
        Ok(hits)
    }

    fn name(&self) -> &str {
        "bedrock-knowledge-base"
    }
}

fn into_hit(result: RetrievalResult) -> SearchHit {
    let url = result
        .location
        .get("s3Location")
        .and_then(|l| string_field(l, "uri"))
        .or_else(|| {
            result
                .location
                .get("webLocation")
                .and_then(|l| string_field(l, "url"))
        });

    let filename = string_field(&result.metadata, "filename").or_else(|| {
        url.as_deref()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    });

    SearchHit {
        content: result.content.text,
        filename,
        url,
        date: string_field(&result.metadata, "date"),
        score: result.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebrief_core::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retriever(server: &MockServer) -> BedrockKnowledgeBaseRetriever {
        BedrockKnowledgeBaseRetriever::new(
            ResilientClient::new(RetryPolicy::none()),
            AwsCredentials::new("AKIDEXAMPLE", "secret"),
            "ap-northeast-1",
            "KB123",
        )
        .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_retrieve_filters_low_scores() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/KB123/retrieve"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .and(body_json(json!({
                "retrievalQuery": {"text": "今週"},
                "retrievalConfiguration": {"vectorSearchConfiguration": {"numberOfResults": 3}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retrievalResults": [
                    {
                        "content": {"text": "火曜日は早起きした"},
                        "location": {"type": "S3", "s3Location": {"uri": "s3://notes/2024/05/07.md"}},
                        "metadata": {"date": "2024-05-07"},
                        "score": 0.82
                    },
                    {
                        "content": {"text": "weak match"},
                        "location": {"type": "S3", "s3Location": {"uri": "s3://notes/x.md"}},
                        "score": 0.31
                    },
                    {
                        "content": {"text": "web page"},
                        "location": {"type": "WEB", "webLocation": {"url": "https://example.com/"}},
                        "metadata": {"filename": "bookmark"},
                        "score": 0.5
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits = retriever(&server).retrieve("今週", 3).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "火曜日は早起きした");
        assert_eq!(hits[0].url.as_deref(), Some("s3://notes/2024/05/07.md"));
        assert_eq!(hits[0].filename.as_deref(), Some("07.md"));
        assert_eq!(hits[0].date.as_deref(), Some("2024-05-07"));
        assert_eq!(hits[1].filename.as_deref(), Some("bookmark"));
        assert!(hits[1].date.is_none());
    }

    #[tokio::test]
    async fn test_access_denied_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "The security token included in the request is invalid."
            })))
            .mount(&server)
            .await;

        let err = retriever(&server).retrieve("q", 3).await.unwrap_err();
        assert!(matches!(err, NotebriefError::Upstream { status: 403, .. }));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = AwsConfig {
            knowledge_base_id: Some("KB".to_string()),
            ..Default::default()
        };
        assert!(BedrockKnowledgeBaseRetriever::from_config(&config, ResilientClient::default())
            .is_err());
    }
}
