//! Application state management

use notebrief_core::AppConfig;
use notebrief_rag::{build_pipeline, SummaryPipeline};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Retrieve-then-summarize pipeline
    pub pipeline: Arc<SummaryPipeline>,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
}

impl AppState {
    /// Create application state around an existing pipeline
    pub fn new(config: AppConfig, pipeline: Arc<SummaryPipeline>) -> Self {
        Self {
            config,
            pipeline,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        }
    }

    /// Validate the config and build the pipeline for its backend
    pub fn from_config(config: AppConfig) -> notebrief_core::Result<Self> {
        let pipeline = build_pipeline(&config)?;
        Ok(Self::new(config, Arc::new(pipeline)))
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
