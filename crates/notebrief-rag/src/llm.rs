//! Chat model clients
//!
//! Provides [`ChatModel`] implementations for Google Gemini, Azure OpenAI
//! and Amazon Bedrock (Converse API). Every client sends its requests through
//! a [`ResilientClient`], so transient failures are retried before surfacing.

use async_trait::async_trait;
use chrono::Utc;
use notebrief_core::auth::{uri_encode, SigV4Signer};
use notebrief_core::{
    AppConfig, AwsConfig, AzureConfig, Backend, ChatMessage, ChatModel, ConfigError, GcpConfig,
    GenerationRequest, NotebriefError, ResilientClient, Result, Role,
};
use notebrief_search::bedrock::aws_credentials;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Google Gemini
// ============================================================================

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client
///
/// Gemini is addressed as a single-prompt model: the text of every human
/// message is joined with newlines and sent as one part. System and
/// assistant messages are not forwarded.
pub struct GeminiChatModel {
    client: ResilientClient,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

impl GeminiChatModel {
    /// Create a client; the API key must be non-empty
    pub fn new(
        client: ResilientClient,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired(vec!["GEMINI_API_KEY".to_string()]).into());
        }

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Create from config
    pub fn from_config(config: &GcpConfig, client: ResilientClient) -> Result<Self> {
        Self::new(
            client,
            config.gemini_api_key.clone().unwrap_or_default(),
            config.model.clone(),
        )
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// The single prompt sent to Gemini
    pub fn prompt_for(request: &GenerationRequest) -> String {
        request
            .messages_with_role(Role::Human)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<ChatMessage> {
        let generation_config = if request.temperature.is_some()
            || request.max_output_tokens.is_some()
            || request.stop.is_some()
        {
            Some(GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                stop_sequences: request.stop.clone(),
            })
        } else {
            None
        };

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Self::prompt_for(request),
                }],
            }],
            generation_config,
        };

        let response = self.client.post(self.endpoint()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NotebriefError::upstream("gemini", status.as_u16(), text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| NotebriefError::malformed("gemini", e.to_string()))?;

        let text = result
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                NotebriefError::malformed("gemini", "missing candidates[0].content.parts[0].text")
            })?;

        tracing::debug!(model = %self.model, chars = text.len(), "gemini response received");
        Ok(ChatMessage::assistant(text))
    }

    fn model_type(&self) -> &'static str {
        "chat-google-gemini"
    }
}

// ============================================================================
// Azure OpenAI
// ============================================================================

/// Azure OpenAI chat completions client for one deployment
pub struct AzureOpenAiChatModel {
    client: ResilientClient,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

#[derive(Debug, Serialize)]
struct AzureChatRequest<'a> {
    messages: Vec<AzureMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
struct AzureMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse {
    choices: Vec<AzureChoice>,
}

#[derive(Debug, Deserialize)]
struct AzureChoice {
    message: AzureResponseMessage,
}

#[derive(Debug, Deserialize)]
struct AzureResponseMessage {
    content: Option<String>,
}

impl AzureOpenAiChatModel {
    pub fn new(
        client: ResilientClient,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: AzureConfig::default().openai_api_version,
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Create from config
    pub fn from_config(config: &AzureConfig, client: ResilientClient) -> Result<Self> {
        let endpoint = config.openai_endpoint.clone().ok_or_else(|| {
            ConfigError::MissingRequired(vec!["AZURE_OPENAI_ENDPOINT".to_string()])
        })?;
        let api_key = config.openai_api_key.clone().ok_or_else(|| {
            ConfigError::MissingRequired(vec!["AZURE_OPENAI_API_KEY".to_string()])
        })?;
        let deployment = config.openai_deployment.clone().ok_or_else(|| {
            ConfigError::MissingRequired(vec!["AZURE_OPENAI_DEPLOYMENT".to_string()])
        })?;

        Ok(Self::new(client, endpoint, api_key, deployment)
            .with_api_version(config.openai_api_version.clone()))
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

fn openai_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiChatModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<ChatMessage> {
        let body = AzureChatRequest {
            messages: request
                .messages
                .iter()
                .map(|m| AzureMessage {
                    role: openai_role(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            stop: request.stop.as_deref(),
        };

        let response = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NotebriefError::upstream("azure-openai", status.as_u16(), text));
        }

        let result: AzureChatResponse = response
            .json()
            .await
            .map_err(|e| NotebriefError::malformed("azure-openai", e.to_string()))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| NotebriefError::malformed("azure-openai", "no choices returned"))?;

        Ok(ChatMessage::assistant(content))
    }

    fn model_type(&self) -> &'static str {
        "azure-openai-chat"
    }
}

// ============================================================================
// Amazon Bedrock
// ============================================================================

/// Bedrock Converse API client
pub struct BedrockChatModel {
    client: ResilientClient,
    signer: SigV4Signer,
    base_url: String,
    model_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<ContentBlock>,
    messages: Vec<ConverseMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inference_config: Option<InferenceConfig>,
}

#[derive(Debug, Serialize)]
struct ConverseMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

impl BedrockChatModel {
    pub fn new(
        client: ResilientClient,
        signer: SigV4Signer,
        region: &str,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            signer,
            base_url: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            model_id: model_id.into(),
        }
    }

    /// Create from config; an inference profile ARN replaces the model id
    pub fn from_config(config: &AwsConfig, client: ResilientClient) -> Result<Self> {
        let signer = SigV4Signer::new(aws_credentials(config)?, &config.region, "bedrock");
        Ok(Self::new(
            client,
            signer,
            &config.region,
            config.invoke_model_id(),
        ))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn converse_url(&self) -> Result<Url> {
        let raw = format!("{}/model/{}/converse", self.base_url, uri_encode(&self.model_id));
        Url::parse(&raw).map_err(|e| anyhow::anyhow!("invalid converse url {raw}: {e}").into())
    }

    /// Converse requires alternating turns; consecutive messages of one role
    /// become content blocks of a single turn
    fn build_request(request: &GenerationRequest) -> Result<ConverseRequest> {
        let system = request
            .messages_with_role(Role::System)
            .map(|m| ContentBlock {
                text: m.content.clone(),
            })
            .collect();

        let mut messages: Vec<ConverseMessage> = Vec::new();
        for message in request.messages.iter().filter(|m| m.role != Role::System) {
            let role = match message.role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            let block = ContentBlock {
                text: message.content.clone(),
            };
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.push(block),
                _ => messages.push(ConverseMessage {
                    role,
                    content: vec![block],
                }),
            }
        }

        if messages.is_empty() {
            return Err(NotebriefError::InvalidRequest(
                "conversation has no user messages".to_string(),
            ));
        }

        let inference_config = if request.temperature.is_some()
            || request.max_output_tokens.is_some()
            || request.stop.is_some()
        {
            Some(InferenceConfig {
                max_tokens: request.max_output_tokens,
                temperature: request.temperature,
                stop_sequences: request.stop.clone(),
            })
        } else {
            None
        };

        Ok(ConverseRequest {
            system,
            messages,
            inference_config,
        })
    }
}

#[async_trait]
impl ChatModel for BedrockChatModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<ChatMessage> {
        let url = self.converse_url()?;
        let payload = serde_json::to_vec(&Self::build_request(request)?)
            .map_err(|e| anyhow::anyhow!("failed to encode converse request: {e}"))?;

        let mut builder = self
            .client
            .post(url.clone())
            .header("content-type", "application/json");
        for (name, value) in self.signer.sign("POST", &url, &payload, Utc::now()) {
            builder = builder.header(name, &value);
        }

        let response = builder.body(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NotebriefError::upstream("bedrock", status.as_u16(), text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| NotebriefError::malformed("bedrock", e.to_string()))?;

        let text = result
            .pointer("/output/message/content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| NotebriefError::malformed("bedrock", "missing output.message.content text"))?;

        if let Some(usage) = result.get("usage") {
            tracing::debug!(model = %self.model_id, usage = %usage, "bedrock response received");
        }
        Ok(ChatMessage::assistant(text))
    }

    fn model_type(&self) -> &'static str {
        "amazon_bedrock_chat"
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create the chat model for the configured backend
pub fn create_chat_model(
    config: &AppConfig,
    client: ResilientClient,
) -> Result<Box<dyn ChatModel>> {
    match config.backend {
        Backend::Azure => Ok(Box::new(AzureOpenAiChatModel::from_config(
            &config.azure,
            client,
        )?)),
        Backend::Gcp => Ok(Box::new(GeminiChatModel::from_config(&config.gcp, client)?)),
        Backend::Aws => Ok(Box::new(BedrockChatModel::from_config(&config.aws, client)?)),
    }
}
