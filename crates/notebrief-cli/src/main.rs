//! Notebrief CLI - Ask questions about daily notes
//!
//! Usage:
//!   notebrief "今週は何をしていた？"
//!   notebrief --backend gcp "週末の出来事をまとめて"
//!   notebrief --azure --json "最近の読書記録"

use anyhow::Context;
use clap::Parser;
use notebrief_core::{AppConfig, Backend};
use notebrief_rag::build_pipeline;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "notebrief")]
#[command(about = "Summarize your daily notes with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Question to ask
    query: String,

    /// Search + chat backend pair (azure, gcp, aws)
    #[arg(long, env = "NOTEBRIEF_BACKEND")]
    backend: Option<Backend>,

    /// Shorthand for --backend azure
    #[arg(long, conflicts_with = "backend")]
    azure: bool,

    /// TOML config file; environment variables take precedence
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Print the summary with its sources as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let config = match &self.config {
            Some(path) => AppConfig::from_file(path)?.with_env_override()?,
            None => AppConfig::from_env()?,
        };

        Ok(match self.selected_backend() {
            Some(backend) => config.with_backend(backend),
            None => config,
        })
    }

    fn selected_backend(&self) -> Option<Backend> {
        if self.azure {
            Some(Backend::Azure)
        } else {
            self.backend
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config().context("failed to load configuration")?;
    let pipeline = build_pipeline(&config).context("failed to initialize pipeline")?;

    let summary = pipeline.summarize(&cli.query).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.summary);
    }

    Ok(())
}
