//! spacebio: enriches the space-biology publication catalogue with
//! AI-generated summaries, one batch per invocation.

mod config;

use std::sync::Arc;
use std::time::Duration;

use spacebio_common::sandbox::{SandboxClient, DEFAULT_TIMEOUT};
use spacebio_ingestion::catalogue::HttpCatalogue;
use spacebio_ingestion::pipeline::EnrichmentPipeline;
use spacebio_ingestion::retriever::PmcScraper;
use spacebio_ingestion::store::DatasetStore;
use spacebio_llm::{Analyzer, ApiKey, GeminiFactory, KeyRotation, RotationState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Inference calls on long articles can take well over the fetch timeout.
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spacebio=debug,info")),
        )
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match config::Config::load_with_env(None) {
        Ok(c) => c,
        Err(e) => {
            error!("Could not load configuration: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded. Model: {}, batch size: {}",
        config.llm.model, config.pipeline.batch_size
    );

    let keys = ApiKey::parse_list(&std::env::var("GEMINI_API_KEYS").unwrap_or_default());
    if keys.is_empty() {
        error!("GEMINI_API_KEYS is missing or empty. Set a comma-separated list of keys.");
        std::process::exit(1);
    }
    info!("Loaded {} API keys", keys.len());

    // Inference
    let llm_client = SandboxClient::with_settings(None, INFERENCE_TIMEOUT)?;
    let factory = Arc::new(GeminiFactory::new(llm_client, config.llm.model.clone()));
    let rotation = KeyRotation::new(RotationState::new(keys)?, factory)?;
    let mut analyzer = Analyzer::new(rotation, config.analyzer_config());

    // Catalogue + article retrieval
    let mut fetch_client = SandboxClient::with_settings(Some(&config.scraper.user_agent), DEFAULT_TIMEOUT)?;
    if !fetch_client.allow_url_host(&config.catalogue.url) {
        error!("Catalogue URL has no host: {}", config.catalogue.url);
        std::process::exit(1);
    }
    let catalogue = Arc::new(HttpCatalogue::new(fetch_client.clone(), config.catalogue.url.clone()));
    let scraper = Arc::new(PmcScraper::new(fetch_client, config.scraper_config())?);
    let store = DatasetStore::new(&config.dataset.path);

    let pipeline = EnrichmentPipeline::new(config.pipeline_config(), catalogue, scraper, store);

    match pipeline.run(&mut analyzer).await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                enriched = report.enriched,
                skipped = report.skipped(),
                duration_ms = report.duration_ms,
                "Batch complete: {} records in dataset",
                report.total_persisted
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {e}");
            std::process::exit(1);
        }
    }
}
