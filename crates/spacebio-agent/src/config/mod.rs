//! Configuration loading for the spacebio runner.
//! Reads spacebio.toml from the current directory or the path in the
//! SPACEBIO_CONFIG env var. Every field has a default, so the file is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use spacebio_ingestion::catalogue::DEFAULT_CATALOGUE_URL;
use spacebio_ingestion::pipeline::PipelineConfig;
use spacebio_ingestion::retriever::ScraperConfig;
use spacebio_ingestion::store::DEFAULT_DATASET_PATH;
use spacebio_llm::backend::DEFAULT_GEMINI_MODEL;
use spacebio_llm::AnalyzerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalogue: CatalogueConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scraper: ScraperSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    #[serde(default = "default_catalogue_url")]
    pub url: String,
}

fn default_catalogue_url() -> String { DEFAULT_CATALOGUE_URL.to_string() }

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self { url: default_catalogue_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_path")]
    pub path: String,
}

fn default_dataset_path() -> String { DEFAULT_DATASET_PATH.to_string() }

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { path: default_dataset_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_record_delay_ms")]
    pub record_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_batch_size()      -> usize { 50 }
fn default_record_delay_ms() -> u64   { 1_000 }
fn default_retry_delay_ms()  -> u64   { 2_000 }
fn default_max_attempts()    -> u32   { 3 }

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            record_delay_ms: default_record_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model()             -> String { DEFAULT_GEMINI_MODEL.to_string() }
fn default_max_output_tokens() -> u32    { 8192 }
fn default_temperature()       -> f32    { 0.1 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperSection {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_user_agent() -> String { "Mozilla/5.0".to_string() }
fn default_min_chars()  -> usize  { 200 }
fn default_max_chars()  -> usize  { 30_000 }

impl Default for ScraperSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
        }
    }
}


impl Config {
    /// Load configuration from spacebio.toml.
    /// Checks SPACEBIO_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("SPACEBIO_CONFIG")
            .unwrap_or_else(|_| "spacebio.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load `.env` (the given file, or `.env` in the working directory), then
    /// the configuration. `.env` may itself set SPACEBIO_CONFIG.
    pub fn load_with_env(env_file: Option<&Path>) -> anyhow::Result<Self> {
        let loaded = match env_file {
            Some(path) => dotenvy::from_path(path).is_ok(),
            None => dotenvy::dotenv().is_ok(),
        };
        if !loaded {
            tracing::warn!("No .env file found; relying on process environment");
        }
        Self::load()
    }

    /// A missing file yields defaults; a present but invalid one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.pipeline.batch_size,
            record_delay: Duration::from_millis(self.pipeline.record_delay_ms),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            max_attempts: self.pipeline.max_attempts,
            retry_delay: Duration::from_millis(self.pipeline.retry_delay_ms),
            max_output_tokens: self.llm.max_output_tokens,
            temperature: self.llm.temperature,
        }
    }

    pub fn scraper_config(&self) -> ScraperConfig {
        ScraperConfig {
            user_agent: self.scraper.user_agent.clone(),
            min_chars: self.scraper.min_chars,
            max_chars: self.scraper.max_chars,
            ..ScraperConfig::default()
        }
    }
}
