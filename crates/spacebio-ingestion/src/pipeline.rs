//! Batch enrichment pipeline.
//!
//! One run:
//!   1. Load the existing dataset and derive the resume offset
//!   2. Fetch the catalogue and cut the next window of `batch_size` entries
//!   3. For each entry: retrieve text → analyze → build an enriched record,
//!      pacing between records
//!   4. Persist existing ++ new records in one write
//!
//! Per-record failures are skips. Only a catalogue fetch failure (before any
//! write) and credential exhaustion (after the write) fail the run, so a run
//! never leaves the dataset smaller than it found it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use spacebio_common::{CatalogueRecord, EnrichedRecord, SpacebioError};
use spacebio_llm::{Analyzer, InferenceError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalogue::CatalogueSource;
use crate::retriever::ContentRetriever;
use crate::store::{next_offset, to_stored, DatasetStore};

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Catalogue entries attempted per run.
    pub batch_size: usize,
    /// Pause after every record that reached retrieval.
    pub record_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            record_delay: Duration::from_secs(1),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("catalogue fetch failed: {0}")]
    Catalogue(#[source] SpacebioError),
    #[error("all {keys} API keys exhausted; saved {persisted} new records ({total} total)")]
    KeysExhausted { keys: usize, persisted: usize, total: usize },
    #[error("failed to persist dataset: {0}")]
    Persist(#[source] SpacebioError),
}

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub stage: String,
    pub message: String,
    /// 1-based catalogue position of the record in flight, if any.
    pub position: Option<usize>,
    pub enriched: usize,
    pub skipped: usize,
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// 1-based catalogue positions covered by this run (inclusive); zero when
    /// nothing was pending.
    pub first_position: usize,
    pub last_position: usize,
    pub attempted: usize,
    pub enriched: usize,
    pub skipped_invalid: usize,
    pub skipped_no_content: usize,
    pub skipped_inference: usize,
    pub total_persisted: usize,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn skipped(&self) -> usize {
        self.skipped_invalid + self.skipped_no_content + self.skipped_inference
    }
}

enum RecordOutcome {
    Enriched(EnrichedRecord),
    NoContent,
    InferenceFailed,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct EnrichmentPipeline {
    cfg: PipelineConfig,
    catalogue: Arc<dyn CatalogueSource>,
    retriever: Arc<dyn ContentRetriever>,
    store: DatasetStore,
    progress_tx: Option<broadcast::Sender<PipelineProgress>>,
}

impl EnrichmentPipeline {
    pub fn new(
        cfg: PipelineConfig,
        catalogue: Arc<dyn CatalogueSource>,
        retriever: Arc<dyn ContentRetriever>,
        store: DatasetStore,
    ) -> Self {
        Self { cfg, catalogue, retriever, store, progress_tx: None }
    }

    pub fn with_progress(mut self, tx: broadcast::Sender<PipelineProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn emit(&self, report: &BatchReport, stage: &str, message: String, position: Option<usize>) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(PipelineProgress {
                run_id: report.run_id,
                stage: stage.to_string(),
                message,
                position,
                enriched: report.enriched,
                skipped: report.skipped(),
            });
        }
    }

    /// Run one batch. The analyzer carries the credential cursor, so a key
    /// rotated away from here stays retired for the rest of the process.
    #[instrument(skip_all)]
    pub async fn run(&self, analyzer: &mut Analyzer) -> Result<BatchReport, PipelineError> {
        let t0 = Instant::now();
        let mut report = BatchReport { run_id: Uuid::new_v4(), ..Default::default() };

        let existing = self.store.load();
        let offset = next_offset(&existing);
        info!(run_id = %report.run_id, "Found {} articles already processed", existing.len());
        self.emit(&report, "load", format!("{} records already processed", existing.len()), None);

        let catalogue = self.catalogue.load().await.map_err(PipelineError::Catalogue)?;
        let pending: Vec<(usize, CatalogueRecord)> = catalogue
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(self.cfg.batch_size)
            .collect();

        if pending.is_empty() {
            info!("All articles processed. Nothing to do!");
            report.total_persisted = existing.len();
            report.duration_ms = t0.elapsed().as_millis() as u64;
            self.emit(&report, "done", "nothing to do".to_string(), None);
            return Ok(report);
        }

        report.attempted = pending.len();
        report.first_position = offset + 1;
        report.last_position = offset + pending.len();
        info!(
            "Processing a new batch of {} articles (from #{} to #{})",
            report.attempted, report.first_position, report.last_position
        );

        let mut batch = Vec::new();
        let mut fatal = None;

        for (position, record) in pending {
            if !record.is_complete() {
                report.skipped_invalid += 1;
                continue;
            }
            info!(position = position + 1, "Processing: {}", record.title);
            self.emit(&report, "record", record.title.clone(), Some(position + 1));

            match self.process(position, &record, analyzer).await {
                Ok(RecordOutcome::Enriched(enriched)) => {
                    info!("AI analysis successful! Category: {}", enriched.category);
                    batch.push(enriched);
                    report.enriched += 1;
                }
                Ok(RecordOutcome::NoContent) => report.skipped_no_content += 1,
                Ok(RecordOutcome::InferenceFailed) => report.skipped_inference += 1,
                Err(e) => {
                    error!(error = %e, "Run stopped unexpectedly");
                    fatal = Some(e);
                    break;
                }
            }

            tokio::time::sleep(self.cfg.record_delay).await;
        }

        let new_records = batch.len();
        let mut combined = existing;
        combined.extend(to_stored(&batch).map_err(PipelineError::Persist)?);
        self.store.save(&combined).map_err(PipelineError::Persist)?;

        report.total_persisted = combined.len();
        report.duration_ms = t0.elapsed().as_millis() as u64;
        self.emit(&report, "persist", format!("saved {} records", combined.len()), None);

        if let Some(InferenceError::KeysExhausted { keys }) = fatal {
            return Err(PipelineError::KeysExhausted { keys, persisted: new_records, total: combined.len() });
        }

        info!(
            enriched = report.enriched,
            skipped = report.skipped(),
            "Saved a total of {} articles to {}",
            combined.len(),
            self.store.path().display()
        );
        Ok(report)
    }

    async fn process(
        &self,
        position: usize,
        record: &CatalogueRecord,
        analyzer: &mut Analyzer,
    ) -> Result<RecordOutcome, InferenceError> {
        let text = match self.retriever.fetch(&record.link).await {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                warn!(position = position + 1, "No article text, skipping");
                return Ok(RecordOutcome::NoContent);
            }
        };

        match analyzer.analyze(&text, &record.title).await? {
            Some(summary) => Ok(RecordOutcome::Enriched(EnrichedRecord::from_summary(position, record, summary))),
            None => Ok(RecordOutcome::InferenceFailed),
        }
    }
}
