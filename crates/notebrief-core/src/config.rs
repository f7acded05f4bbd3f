//! Notebrief Configuration Management
//!
//! Configuration is read once at process start from environment variables
//! (or a TOML file overlaid with the environment) and then passed by
//! reference into every component. `AppConfig::validate` checks everything
//! the selected backend needs and reports all missing values at once.

use crate::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant that helps the user reflect on their daily notes.\n\
     Use the retrieved context to answer the user's question in Japanese.";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Which search + chat pair to use
    pub backend: Backend,

    /// Retry policy for every outbound HTTP call
    pub retry: RetryPolicy,

    /// Retrieval and generation parameters
    pub rag: RagConfig,

    /// Azure AI Search + Azure OpenAI
    pub azure: AzureConfig,

    /// Vertex AI Search + Gemini
    pub gcp: GcpConfig,

    /// Bedrock Knowledge Bases + Bedrock chat
    pub aws: AwsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().apply_lookup(lookup)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    fn apply_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Backend
        if let Some(backend) = get("NOTEBRIEF_BACKEND") {
            self.backend = backend.parse()?;
        } else if get("USE_AZURE").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            self.backend = Backend::Azure;
        }

        // Server
        if let Some(host) = get("API_HOST") {
            self.server.host = host;
        }
        for key in ["API_PORT", "PORT", "FUNCTIONS_CUSTOMHANDLER_PORT"] {
            if let Some(port) = get(key) {
                self.server.port = parse_value(key, &port)?;
                break;
            }
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Retry
        if let Some(retries) = get("HTTP_MAX_RETRIES") {
            self.retry.max_retries = parse_value("HTTP_MAX_RETRIES", &retries)?;
        }
        if let Some(factor) = get("HTTP_BACKOFF_FACTOR") {
            self.retry.backoff_factor = parse_value("HTTP_BACKOFF_FACTOR", &factor)?;
        }

        // RAG
        if let Some(top_k) = get("RAG_TOP_K") {
            self.rag.top_k = parse_value("RAG_TOP_K", &top_k)?;
        }
        if let Some(temperature) = get("LLM_TEMPERATURE") {
            self.rag.temperature = parse_value("LLM_TEMPERATURE", &temperature)?;
        }
        if let Some(max_tokens) = get("LLM_MAX_TOKENS") {
            self.rag.max_output_tokens = parse_value("LLM_MAX_TOKENS", &max_tokens)?;
        }
        if let Some(prompt) = get("SYSTEM_PROMPT") {
            self.rag.system_prompt = prompt;
        }

        // Azure
        let azure = &mut self.azure;
        set_opt(&mut azure.search_service_name, get("AZURE_AI_SEARCH_SERVICE_NAME"));
        set_opt(&mut azure.search_endpoint, get("AZURE_SEARCH_ENDPOINT"));
        set_opt(&mut azure.search_api_key, get("AZURE_SEARCH_API_KEY"));
        set_opt(&mut azure.search_index, get("AZURE_SEARCH_INDEX"));
        set_opt(&mut azure.openai_endpoint, get("AZURE_OPENAI_ENDPOINT"));
        set_opt(&mut azure.openai_api_key, get("AZURE_OPENAI_API_KEY"));
        set_opt(&mut azure.openai_deployment, get("AZURE_OPENAI_DEPLOYMENT"));
        if let Some(version) = get("AZURE_OPENAI_API_VERSION") {
            azure.openai_api_version = version;
        }

        // GCP
        let gcp = &mut self.gcp;
        set_opt(&mut gcp.project_id, get("GCP_PROJECT_ID"));
        if let Some(location) = get("GCP_LOCATION_ID") {
            gcp.location_id = location;
        }
        set_opt(&mut gcp.search_engine_id, get("VERTEX_SEARCH_ENGINE_ID"));
        set_opt(&mut gcp.data_store_id, get("VERTEX_SEARCH_DATA_STORE_ID"));
        set_opt(&mut gcp.gemini_api_key, get("GEMINI_API_KEY"));
        if let Some(model) = get("VERTEX_MODEL_NAME") {
            gcp.model = model;
        }
        set_opt(&mut gcp.access_token, get("GCP_ACCESS_TOKEN"));
        if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            gcp.credentials_path = PathBuf::from(path);
        }

        // AWS
        let aws = &mut self.aws;
        set_opt(&mut aws.knowledge_base_id, get("KB_ID"));
        if let Some(region) = get("AWS_REGION") {
            aws.region = region;
        }
        if let Some(model) = get("MODEL_ID") {
            aws.model_id = model;
        }
        set_opt(&mut aws.inference_profile_arn, get("INFERENCE_PROFILE_ARN"));
        if let Some(score) = get("KB_MIN_SCORE") {
            aws.min_score = parse_value("KB_MIN_SCORE", &score)?;
        }
        set_opt(&mut aws.access_key_id, get("AWS_ACCESS_KEY_ID"));
        set_opt(&mut aws.secret_access_key, get("AWS_SECRET_ACCESS_KEY"));
        set_opt(&mut aws.session_token, get("AWS_SESSION_TOKEN"));

        // Logging
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = get("LOG_JSON") {
            self.logging.json_format = json.eq_ignore_ascii_case("true") || json == "1";
        }

        Ok(self)
    }

    /// Select a different backend pair
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Check that every value the selected backend needs is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = match self.backend {
            Backend::Azure => self.azure.missing(),
            Backend::Gcp => self.gcp.missing(),
            Backend::Aws => self.aws.missing(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired(missing))
        }
    }
}

fn set_opt(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn require(missing: &mut Vec<String>, value: &Option<String>, name: &str) {
    if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
        missing.push(name.to_string());
    }
}

/// Supported backend pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Azure,
    Gcp,
    #[default]
    Aws,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "gcp" | "google" => Ok(Self::Gcp),
            "aws" | "bedrock" => Ok(Self::Aws),
            _ => Err(ConfigError::InvalidValue {
                key: "NOTEBRIEF_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Azure => write!(f, "azure"),
            Self::Gcp => write!(f, "gcp"),
            Self::Aws => write!(f, "aws"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec![],
        }
    }
}

/// Retrieval and generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Number of documents to retrieve
    pub top_k: usize,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens in the generated answer
    pub max_output_tokens: u32,

    /// System instruction placed before the context
    pub system_prompt: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            temperature: 0.7,
            max_output_tokens: 400,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Azure AI Search + Azure OpenAI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Search service name (`https://{name}.search.windows.net`)
    pub search_service_name: Option<String>,

    /// Explicit search endpoint, wins over the service name
    pub search_endpoint: Option<String>,

    pub search_api_key: Option<String>,

    pub search_index: Option<String>,

    /// Search REST API version
    pub search_api_version: String,

    pub openai_endpoint: Option<String>,

    pub openai_api_key: Option<String>,

    /// Chat deployment name
    pub openai_deployment: Option<String>,

    pub openai_api_version: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            search_service_name: None,
            search_endpoint: None,
            search_api_key: None,
            search_index: None,
            search_api_version: "2023-11-01".to_string(),
            openai_endpoint: None,
            openai_api_key: None,
            openai_deployment: None,
            openai_api_version: "2024-10-21".to_string(),
        }
    }
}

impl AzureConfig {
    /// Resolved search endpoint
    pub fn search_url(&self) -> Option<String> {
        self.search_endpoint.clone().or_else(|| {
            self.search_service_name
                .as_ref()
                .map(|name| format!("https://{name}.search.windows.net"))
        })
    }

    fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.search_url().is_none() {
            missing.push("AZURE_AI_SEARCH_SERVICE_NAME or AZURE_SEARCH_ENDPOINT".to_string());
        }
        require(&mut missing, &self.search_api_key, "AZURE_SEARCH_API_KEY");
        require(&mut missing, &self.search_index, "AZURE_SEARCH_INDEX");
        require(&mut missing, &self.openai_endpoint, "AZURE_OPENAI_ENDPOINT");
        require(&mut missing, &self.openai_api_key, "AZURE_OPENAI_API_KEY");
        require(&mut missing, &self.openai_deployment, "AZURE_OPENAI_DEPLOYMENT");
        missing
    }
}

/// Vertex AI Search + Gemini configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub project_id: Option<String>,

    /// Discovery Engine location (`global`, `us`, `eu`)
    pub location_id: String,

    /// Search app id; when set the engine serving config is used
    pub search_engine_id: Option<String>,

    pub data_store_id: Option<String>,

    pub gemini_api_key: Option<String>,

    /// Gemini model name
    pub model: String,

    /// Pre-issued OAuth access token for Discovery Engine
    pub access_token: Option<String>,

    /// Service-account key file used when no access token is given
    pub credentials_path: PathBuf,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location_id: "global".to_string(),
            search_engine_id: None,
            data_store_id: None,
            gemini_api_key: None,
            model: "gemini-pro".to_string(),
            access_token: None,
            credentials_path: PathBuf::from("sa-key.json"),
        }
    }
}

impl GcpConfig {
    fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        require(&mut missing, &self.project_id, "GCP_PROJECT_ID");
        require(&mut missing, &self.data_store_id, "VERTEX_SEARCH_DATA_STORE_ID");
        require(&mut missing, &self.gemini_api_key, "GEMINI_API_KEY");
        if self.access_token.is_none() && !self.credentials_path.exists() {
            missing.push("GCP_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS".to_string());
        }
        missing
    }
}

/// Bedrock Knowledge Bases + Bedrock chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub knowledge_base_id: Option<String>,

    pub region: String,

    /// Bedrock model id
    pub model_id: String,

    /// Inference profile used instead of the model id when set
    pub inference_profile_arn: Option<String>,

    /// Hits scoring below this are dropped
    pub min_score: f32,

    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,

    pub session_token: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            knowledge_base_id: None,
            region: "ap-northeast-1".to_string(),
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            inference_profile_arn: None,
            min_score: 0.5,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

impl AwsConfig {
    /// Model identifier placed in the invoke path
    pub fn invoke_model_id(&self) -> &str {
        self.inference_profile_arn
            .as_deref()
            .unwrap_or(&self.model_id)
    }

    fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        require(&mut missing, &self.knowledge_base_id, "KB_ID");
        require(&mut missing, &self.access_key_id, "AWS_ACCESS_KEY_ID");
        require(&mut missing, &self.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        missing
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
}
