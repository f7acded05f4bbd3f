//! Notebrief RAG - Retrieve-then-summarize pipeline
//!
//! One request flows through the pipeline as:
//! 1. Reject empty queries before any upstream call
//! 2. Retrieve the top-k notes for the query
//! 3. Build the conversation: system prompt, one message per note, the query
//! 4. Ask the chat model for the next assistant turn
//! 5. Return its text with the notes as sources

use notebrief_core::{
    AppConfig, ChatMessage, ChatModel, GenerationRequest, NotebriefError, RagConfig,
    ResilientClient, Result, RetrievedDocument, Retriever, SearchHit, Summary,
};
use std::sync::Arc;
use std::time::Instant;

pub mod llm;

pub use llm::{create_chat_model, AzureOpenAiChatModel, BedrockChatModel, GeminiChatModel};

// ============================================================================
// Configuration
// ============================================================================

/// Retrieval and generation parameters of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of notes to retrieve
    pub top_k: usize,

    /// Sampling temperature
    pub temperature: f32,

    /// Upper bound on answer tokens
    pub max_output_tokens: u32,

    /// Instruction placed first in every conversation
    pub system_prompt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for PipelineConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            top_k: config.top_k,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Retrieve-then-summarize pipeline over one retriever and one chat model
pub struct SummaryPipeline {
    retriever: Arc<dyn Retriever>,
    chat_model: Arc<dyn ChatModel>,
    config: PipelineConfig,
}

impl SummaryPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        chat_model: Arc<dyn ChatModel>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            chat_model,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Name of the retriever backend
    pub fn retriever_name(&self) -> &str {
        self.retriever.name()
    }

    /// Type id of the chat model
    pub fn model_type(&self) -> &'static str {
        self.chat_model.model_type()
    }

    /// Answer a query from the retrieved notes
    pub async fn summarize(&self, query: &str) -> Result<Summary> {
        if query.trim().is_empty() {
            return Err(NotebriefError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }

        let start_time = Instant::now();

        let mut hits = self.retriever.retrieve(query, self.config.top_k).await?;
        hits.truncate(self.config.top_k);
        tracing::debug!(
            retriever = self.retriever.name(),
            "retrieved {} documents",
            hits.len()
        );

        let request = GenerationRequest::new(self.build_messages(query, &hits))
            .with_temperature(self.config.temperature)
            .with_max_output_tokens(self.config.max_output_tokens);

        let reply = self.chat_model.generate(&request).await?;

        tracing::info!(
            model = self.chat_model.model_type(),
            sources = hits.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "summary generated"
        );

        Ok(Summary {
            summary: reply.content,
            sources: hits.into_iter().map(RetrievedDocument::from).collect(),
        })
    }

    /// System prompt, then each note's text as a human turn, then the query
    pub fn build_messages(&self, query: &str, hits: &[SearchHit]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(hits.len() + 2);
        messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        messages.extend(hits.iter().map(|hit| ChatMessage::human(hit.content.clone())));
        messages.push(ChatMessage::human(query));
        messages
    }
}

/// Build the pipeline for the configured backend
///
/// Fails with every missing setting listed when the configuration is incomplete.
pub fn build_pipeline(config: &AppConfig) -> Result<SummaryPipeline> {
    config.validate()?;

    let client = ResilientClient::new(config.retry.clone());
    let retriever = notebrief_search::create_retriever(config, client.clone())?;
    let chat_model = create_chat_model(config, client)?;

    tracing::info!(
        backend = %config.backend,
        retriever = retriever.name(),
        model = chat_model.model_type(),
        "pipeline ready"
    );

    Ok(SummaryPipeline::new(
        Arc::from(retriever),
        Arc::from(chat_model),
        PipelineConfig::from(&config.rag),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebrief_core::{ConfigError, RetryPolicy, Role, UNKNOWN_DATE, UNKNOWN_FILENAME, UNKNOWN_URL};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubRetriever {
        hits: Vec<SearchHit>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubRetriever {
        fn with_hits(hits: Vec<SearchHit>) -> Arc<Self> {
            Arc::new(Self {
                hits,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                hits: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Retriever for StubRetriever {
        async fn retrieve(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotebriefError::upstream("search", 503, "index unavailable"));
            }
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct StubModel {
        reply: std::result::Result<String, u16>,
        calls: AtomicUsize,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl StubModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<ChatMessage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            match &self.reply {
                Ok(text) => Ok(ChatMessage::assistant(text.clone())),
                Err(status) => Err(NotebriefError::upstream("model", *status, "quota exceeded")),
            }
        }

        fn model_type(&self) -> &'static str {
            "stub-chat"
        }
    }

    fn three_notes() -> Vec<SearchHit> {
        vec![
            SearchHit::new("月曜: ジムに行った")
                .with_filename("2024-05-06.md")
                .with_url("https://notes/2024-05-06.md")
                .with_date("2024-05-06"),
            SearchHit::new("水曜: 読書した"),
            SearchHit::new("金曜: 友人と食事").with_filename("2024-05-10.md"),
        ]
    }

    fn pipeline(retriever: Arc<StubRetriever>, model: Arc<StubModel>) -> SummaryPipeline {
        SummaryPipeline::new(retriever, model, PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_summarize_returns_answer_and_sources() {
        let retriever = StubRetriever::with_hits(three_notes());
        let model = StubModel::replying("今週は運動と読書をしました。");
        let pipeline = pipeline(retriever.clone(), model.clone());

        let summary = pipeline.summarize("今週何をした？").await.unwrap();

        assert_eq!(summary.summary, "今週は運動と読書をしました。");
        assert_eq!(summary.sources.len(), 3);
        assert_eq!(summary.sources[0].filename, "2024-05-06.md");
        assert_eq!(summary.sources[0].date, "2024-05-06");
        assert_eq!(summary.sources[1].filename, UNKNOWN_FILENAME);
        assert_eq!(summary.sources[1].url, UNKNOWN_URL);
        assert_eq!(summary.sources[2].date, UNKNOWN_DATE);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conversation_shape_and_parameters() {
        let model = StubModel::replying("ok");
        let pipeline = pipeline(StubRetriever::with_hits(three_notes()), model.clone());

        pipeline.summarize("振り返り").await.unwrap();

        let request = model.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, PipelineConfig::default().system_prompt);
        assert_eq!(request.messages[1], ChatMessage::human("月曜: ジムに行った"));
        assert_eq!(request.messages[3], ChatMessage::human("金曜: 友人と食事"));
        assert_eq!(request.messages[4], ChatMessage::human("振り返り"));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_output_tokens, Some(400));
    }

    #[tokio::test]
    async fn test_retriever_results_are_capped_at_top_k() {
        let mut hits = three_notes();
        hits.push(SearchHit::new("extra"));

        struct Overeager(Vec<SearchHit>);

        #[async_trait::async_trait]
        impl Retriever for Overeager {
            async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
                Ok(self.0.clone())
            }

            fn name(&self) -> &str {
                "overeager"
            }
        }

        let model = StubModel::replying("ok");
        let pipeline =
            SummaryPipeline::new(Arc::new(Overeager(hits)), model.clone(), PipelineConfig::default());

        let summary = pipeline.summarize("q").await.unwrap();
        assert_eq!(summary.sources.len(), 3);
        assert_eq!(model.last_request.lock().unwrap().as_ref().unwrap().messages.len(), 5);
    }

    #[tokio::test]
    async fn test_no_documents_still_generates() {
        let model = StubModel::replying("記録が見つかりませんでした");
        let pipeline = pipeline(StubRetriever::with_hits(Vec::new()), model.clone());

        let summary = pipeline.summarize("q").await.unwrap();

        assert!(summary.sources.is_empty());
        let request = model.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_makes_no_calls() {
        let retriever = StubRetriever::with_hits(three_notes());
        let model = StubModel::replying("unused");
        let pipeline = pipeline(retriever.clone(), model.clone());

        for query in ["", "   ", "\n\t"] {
            let err = pipeline.summarize(query).await.unwrap_err();
            assert!(err.is_client_error());
        }

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retriever_failure_skips_model() {
        let model = StubModel::replying("unused");
        let pipeline = pipeline(StubRetriever::failing(), model.clone());

        let err = pipeline.summarize("q").await.unwrap_err();

        assert!(err.to_string().contains("index unavailable"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let pipeline = pipeline(StubRetriever::with_hits(three_notes()), StubModel::failing(429));

        let err = pipeline.summarize("q").await.unwrap_err();
        assert!(matches!(err, NotebriefError::Upstream { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_gemini_receives_notes_and_query_as_one_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "contents": [{"parts": [{"text": "note a\nnote b\nwhat happened?"}]}],
                "generationConfig": {"temperature": 0.7, "maxOutputTokens": 400}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "A busy week."}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gemini = GeminiChatModel::new(ResilientClient::new(RetryPolicy::none()), "k", "gemini-pro")
            .unwrap()
            .with_base_url(server.uri());
        let pipeline = SummaryPipeline::new(
            StubRetriever::with_hits(vec![SearchHit::new("note a"), SearchHit::new("note b")]),
            Arc::new(gemini),
            PipelineConfig::default(),
        );

        let summary = pipeline.summarize("what happened?").await.unwrap();
        assert_eq!(summary.summary, "A busy week.");
    }

    #[test]
    fn test_build_pipeline_lists_missing_settings() {
        let err = build_pipeline(&AppConfig::default()).err().unwrap();
        match err {
            NotebriefError::Config(ConfigError::MissingRequired(missing)) => {
                assert!(missing.contains(&"KB_ID".to_string()));
                assert!(missing.contains(&"AWS_ACCESS_KEY_ID".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_config_from_rag_config() {
        let config = PipelineConfig::from(&RagConfig {
            top_k: 5,
            ..Default::default()
        });
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_output_tokens, 400);
    }
}
