//! Notebrief Core - Domain models, traits, and shared types
//!
//! This crate defines the abstractions shared by every Notebrief crate:
//! - Chat messages and generation requests
//! - Search hits and the retrieved documents returned to callers
//! - The `Retriever` and `ChatModel` capabilities
//! - Common error types
//! - Configuration management
//! - Resilient HTTP client and cloud request signing

pub mod auth;
pub mod config;
pub mod http;

pub use config::{
    AppConfig, AwsConfig, AzureConfig, Backend, ConfigError, GcpConfig, LoggingConfig, RagConfig,
    ServerConfig,
};
pub use http::{ResilientClient, RetryPolicy};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Notebrief operations
#[derive(Error, Debug)]
pub enum NotebriefError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{service} returned HTTP {status}: {body}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {service}: {reason}")]
    MalformedResponse { service: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NotebriefError {
    /// Build an upstream error from a status code and response body
    pub fn upstream(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    /// Build a malformed-response error
    pub fn malformed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, NotebriefError>;

// ============================================================================
// Chat Messages
// ============================================================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Human => write!(f, "human"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Outbound call to a chat model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Ordered conversation
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens
    pub max_output_tokens: Option<u32>,

    /// Sequences that stop generation
    pub stop: Option<Vec<String>>,
}

impl GenerationRequest {
    /// Create a request with default sampling parameters
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Messages authored by the given role, in order
    pub fn messages_with_role(&self, role: Role) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(move |m| m.role == role)
    }
}

// ============================================================================
// Search and Summary Types
// ============================================================================

pub const UNKNOWN_FILENAME: &str = "Unknown filename";
pub const UNKNOWN_URL: &str = "Unknown url";
pub const UNKNOWN_DATE: &str = "Unknown date";

/// Raw hit returned by a retriever; metadata may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Text content
    pub content: String,

    /// Source file name
    pub filename: Option<String>,

    /// Storage path or link
    pub url: Option<String>,

    /// Last-modified timestamp as reported by the index
    pub date: Option<String>,

    /// Relevance score (higher is better)
    pub score: Option<f32>,
}

impl SearchHit {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Source document reported back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub filename: String,
    pub url: String,
    pub date: String,
    #[serde(skip)]
    pub score: Option<f32>,
}

impl From<SearchHit> for RetrievedDocument {
    fn from(hit: SearchHit) -> Self {
        Self {
            content: hit.content,
            filename: hit.filename.unwrap_or_else(|| UNKNOWN_FILENAME.to_string()),
            url: hit.url.unwrap_or_else(|| UNKNOWN_URL.to_string()),
            date: hit.date.unwrap_or_else(|| UNKNOWN_DATE.to_string()),
            score: hit.score,
        }
    }
}

/// Generated answer plus the documents it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub sources: Vec<RetrievedDocument>,
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for document retrieval services
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `limit` hits for the query, best first
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Trait for chat models
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the next assistant turn for the conversation
    async fn generate(&self, request: &GenerationRequest) -> Result<ChatMessage>;

    /// Fixed identifier of the implementation
    fn model_type(&self) -> &'static str;
}

// ============================================================================
// Tests
// ============================================================================
