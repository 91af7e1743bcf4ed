//! End-to-end batch runs with mocked catalogue, retriever and inference
//! service. No network access.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use spacebio_common::{CatalogueRecord, EnrichedRecord, SpacebioError};
use spacebio_ingestion::catalogue::CatalogueSource;
use spacebio_ingestion::pipeline::{EnrichmentPipeline, PipelineConfig, PipelineError};
use spacebio_ingestion::retriever::ContentRetriever;
use spacebio_ingestion::store::{DatasetStore, StoredRecord};
use spacebio_llm::{
    Analyzer, AnalyzerConfig, ApiKey, BackendFactory, KeyRotation, LlmBackend, LlmError,
    LlmRequest, LlmResponse, RotationState,
};
use tokio::sync::broadcast;

const TRIGGER_QUOTA: &str = "TRIGGER_QUOTA";
const TRIGGER_FAIL: &str = "TRIGGER_FAIL";

// ── Mocks ─────────────────────────────────────────────────────────────────────

struct VecCatalogue(Option<Vec<CatalogueRecord>>);

#[async_trait]
impl CatalogueSource for VecCatalogue {
    async fn load(&self) -> spacebio_common::Result<Vec<CatalogueRecord>> {
        self.0
            .clone()
            .ok_or_else(|| SpacebioError::Catalogue("HTTP 503 Service Unavailable".to_string()))
    }
}

/// Returns canned text per URL, defaulting to a generic article body.
#[derive(Default)]
struct MapRetriever {
    pages: HashMap<String, Option<String>>,
    fetched: Mutex<Vec<String>>,
}

impl MapRetriever {
    fn with_page(mut self, url: &str, text: Option<&str>) -> Self {
        self.pages.insert(url.to_string(), text.map(String::from));
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentRetriever for MapRetriever {
    async fn fetch(&self, url: &str) -> Option<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some(page) => page.clone(),
            None => Some(format!("Abstract: findings reported at {url}")),
        }
    }
}

type CallLog = Arc<Mutex<Vec<(String, String)>>>;

struct MockBackend {
    key: String,
    spent: bool,
    calls: CallLog,
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let prompt = req.messages[0].content.clone();
        self.calls.lock().unwrap().push((self.key.clone(), prompt.clone()));

        if self.spent || prompt.contains(TRIGGER_QUOTA) {
            return Err(LlmError::ApiError { status: 429, message: "quota".to_string() });
        }
        if prompt.contains(TRIGGER_FAIL) {
            return Err(LlmError::Unavailable("upstream timeout".to_string()));
        }
        let body = serde_json::json!({
            "summary": "The study characterised responses to spaceflight.",
            "category": "cellular-biology",
            "year": 2018,
            "keywords": ["spaceflight", "cells", "ISS", "gene expression", "stress"]
        });
        Ok(LlmResponse {
            content: format!("```json\n{body}\n```"),
            model: "mock".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

struct MockFactory {
    spent: Vec<String>,
    calls: CallLog,
}

impl BackendFactory for MockFactory {
    fn bind(&self, key: &ApiKey) -> Arc<dyn LlmBackend> {
        Arc::new(MockBackend {
            key: key.expose().to_string(),
            spent: self.spent.iter().any(|k| k == key.expose()),
            calls: self.calls.clone(),
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn catalogue(n: usize) -> Vec<CatalogueRecord> {
    (1..=n)
        .map(|i| CatalogueRecord::new(format!("Paper {i}"), format!("https://example.org/{i}")))
        .collect()
}

fn make_analyzer(keys: &str, spent: &[&str]) -> (Analyzer, CallLog) {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let factory = MockFactory {
        spent: spent.iter().map(|s| s.to_string()).collect(),
        calls: calls.clone(),
    };
    let state = RotationState::new(ApiKey::parse_list(keys)).unwrap();
    let rotation = KeyRotation::new(state, Arc::new(factory)).unwrap();
    let cfg = AnalyzerConfig { retry_delay: Duration::ZERO, ..Default::default() };
    (Analyzer::new(rotation, cfg), calls)
}

fn pipeline(
    records: Option<Vec<CatalogueRecord>>,
    retriever: Arc<MapRetriever>,
    path: &Path,
    batch_size: usize,
) -> EnrichmentPipeline {
    EnrichmentPipeline::new(
        PipelineConfig { batch_size, record_delay: Duration::ZERO },
        Arc::new(VecCatalogue(records)),
        retriever,
        DatasetStore::new(path),
    )
}

fn ids(records: &[StoredRecord]) -> Vec<String> {
    records.iter().map(|r| r["id"].as_str().unwrap_or_default().to_string()).collect()
}

fn typed(records: &[StoredRecord]) -> Vec<EnrichedRecord> {
    records.iter().map(|r| serde_json::from_value(r.clone()).unwrap()).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_run_assigns_positional_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default());
    let (mut analyzer, _) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(3)), retriever, &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.enriched, 3);
    assert_eq!((report.first_position, report.last_position), (1, 3));
    let saved = typed(&DatasetStore::new(&path).load());
    assert_eq!(saved.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
    assert_eq!(saved[1].title, "Paper 2");
    assert_eq!(saved[1].url, "https://example.org/2");
    assert_eq!(saved[1].findings, vec![saved[1].summary.clone()]);
}

#[tokio::test]
async fn test_resumption_never_reprocesses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default());

    for _ in 0..3 {
        let (mut analyzer, _) = make_analyzer("k1", &[]);
        pipeline(Some(catalogue(5)), retriever.clone(), &path, 2)
            .run(&mut analyzer)
            .await
            .unwrap();
    }

    let saved = DatasetStore::new(&path).load();
    assert_eq!(ids(&saved), vec!["1", "2", "3", "4", "5"]);

    let fetched = retriever.fetched();
    assert_eq!(fetched.len(), 5, "each record fetched exactly once: {fetched:?}");

    // A fourth run finds nothing left.
    let (mut analyzer, calls) = make_analyzer("k1", &[]);
    let report = pipeline(Some(catalogue(5)), retriever.clone(), &path, 2)
        .run(&mut analyzer)
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.total_persisted, 5);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_bound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default());
    let (mut analyzer, calls) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(120)), retriever.clone(), &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.attempted, 50);
    assert_eq!(DatasetStore::new(&path).load().len(), 50);
    assert_eq!(retriever.fetched().len(), 50);
    assert_eq!(calls.lock().unwrap().len(), 50);
}

#[tokio::test]
async fn test_absent_content_skips_without_inference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(
        MapRetriever::default()
            .with_page("https://example.org/2", None)
            .with_page("https://example.org/3", Some("   ")),
    );
    let (mut analyzer, calls) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(4)), retriever, &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.skipped_no_content, 2);
    assert_eq!(ids(&DatasetStore::new(&path).load()), vec!["1", "4"]);
    let prompts: Vec<String> = calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| !p.contains("Paper 2") && !p.contains("Paper 3")));
}

#[tokio::test]
async fn test_resume_after_skips_keeps_ids_positional() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default().with_page("https://example.org/2", None));

    let (mut analyzer, _) = make_analyzer("k1", &[]);
    pipeline(Some(catalogue(6)), retriever.clone(), &path, 3)
        .run(&mut analyzer)
        .await
        .unwrap();
    let (mut analyzer, _) = make_analyzer("k1", &[]);
    pipeline(Some(catalogue(6)), retriever.clone(), &path, 3)
        .run(&mut analyzer)
        .await
        .unwrap();

    let saved = DatasetStore::new(&path).load();
    assert_eq!(ids(&saved), vec!["1", "3", "4", "5", "6"]);
    for r in &typed(&saved) {
        assert_eq!(r.title, format!("Paper {}", r.id));
    }
    let fetched = retriever.fetched();
    assert_eq!(fetched.iter().filter(|u| u.ends_with("/3")).count(), 1);
}

#[tokio::test]
async fn test_inference_failure_skips_record_after_three_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(
        MapRetriever::default().with_page("https://example.org/2", Some(format!("{TRIGGER_FAIL} body").as_str())),
    );
    let (mut analyzer, calls) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(3)), retriever, &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.skipped_inference, 1);
    assert_eq!(ids(&DatasetStore::new(&path).load()), vec!["1", "3"]);
    let failing = calls.lock().unwrap().iter().filter(|(_, p)| p.contains(TRIGGER_FAIL)).count();
    assert_eq!(failing, 3);
}

#[tokio::test]
async fn test_quota_rotation_uses_second_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default());
    let (mut analyzer, calls) = make_analyzer("k1,k2", &["k1"]);

    let report = pipeline(Some(catalogue(2)), retriever, &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.enriched, 2);
    let keys: Vec<String> = calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec!["k1", "k2", "k2"]);
    assert_eq!(analyzer.rotation().key_number(), 2);
}

#[tokio::test]
async fn test_exhaustion_persists_prior_records_then_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(
        MapRetriever::default().with_page("https://example.org/3", Some(format!("{TRIGGER_QUOTA} body").as_str())),
    );
    let (mut analyzer, _) = make_analyzer("k1", &[]);

    let err = pipeline(Some(catalogue(5)), retriever.clone(), &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::KeysExhausted { keys: 1, persisted: 2, total: 2 }), "{err}");
    assert_eq!(ids(&DatasetStore::new(&path).load()), vec!["1", "2"]);
    // The loop stopped at record 3.
    assert!(!retriever.fetched().iter().any(|u| u.ends_with("/4")));
}

#[tokio::test]
async fn test_exhaustion_keeps_existing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let retriever = Arc::new(MapRetriever::default());

    let (mut analyzer, _) = make_analyzer("k1", &[]);
    pipeline(Some(catalogue(4)), retriever.clone(), &path, 2)
        .run(&mut analyzer)
        .await
        .unwrap();

    let (mut spent, _) = make_analyzer("k1", &["k1"]);
    let err = pipeline(Some(catalogue(4)), retriever, &path, 2)
        .run(&mut spent)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::KeysExhausted { persisted: 0, total: 2, .. }));
    assert_eq!(ids(&DatasetStore::new(&path).load()), vec!["1", "2"]);
}

#[tokio::test]
async fn test_corrupt_dataset_restarts_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, "{ not json").unwrap();
    let (mut analyzer, _) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(2)), Arc::new(MapRetriever::default()), &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.first_position, 1);
    assert_eq!(ids(&DatasetStore::new(&path).load()), vec!["1", "2"]);
}

#[tokio::test]
async fn test_catalogue_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, "[]").unwrap();
    let (mut analyzer, calls) = make_analyzer("k1", &[]);

    let err = pipeline(None, Arc::new(MapRetriever::default()), &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Catalogue(_)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_progress_events_are_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let (tx, mut rx) = broadcast::channel(64);
    let (mut analyzer, _) = make_analyzer("k1", &[]);

    pipeline(Some(catalogue(2)), Arc::new(MapRetriever::default()), &path, 50)
        .with_progress(tx)
        .run(&mut analyzer)
        .await
        .unwrap();

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push((event.stage, event.position));
    }
    assert_eq!(
        stages,
        vec![
            ("load".to_string(), None),
            ("record".to_string(), Some(1)),
            ("record".to_string(), Some(2)),
            ("persist".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_incomplete_catalogue_row_is_skipped_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let mut records = catalogue(3);
    records[1] = CatalogueRecord::new("", "https://example.org/2");
    let retriever = Arc::new(MapRetriever::default());
    let (mut analyzer, calls) = make_analyzer("k1", &[]);

    let report = pipeline(Some(records), retriever.clone(), &path, 50)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.skipped_invalid, 1);
    assert_eq!(report.enriched, 2);
    let saved = DatasetStore::new(&path).load();
    assert_eq!(ids(&saved), vec!["1", "3"]);
    assert_eq!(saved[1]["title"], "Paper 3");
    assert!(!retriever.fetched().iter().any(|u| u.ends_with("/2")));
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_resume_over_loosely_typed_dataset_keeps_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let prior = json!([
        { "id": "1", "title": "Paper 1", "category": "plant-biology", "year": 2012 },
        { "id": "2", "title": "Paper 2", "category": "microbiology", "year": "2015" }
    ]);
    std::fs::write(&path, serde_json::to_string_pretty(&prior).unwrap()).unwrap();
    let retriever = Arc::new(MapRetriever::default());
    let (mut analyzer, _) = make_analyzer("k1", &[]);

    let report = pipeline(Some(catalogue(4)), retriever.clone(), &path, 1)
        .run(&mut analyzer)
        .await
        .unwrap();

    assert_eq!(report.first_position, 3);
    let saved = DatasetStore::new(&path).load();
    assert_eq!(ids(&saved), vec!["1", "2", "3"]);
    assert_eq!(saved[..2].to_vec(), prior.as_array().unwrap().clone());
    assert_eq!(retriever.fetched(), vec!["https://example.org/3"]);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_follows_every_record_that_reached_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let mut records = catalogue(4);
    records[1] = CatalogueRecord::new("Paper 2", "");
    let retriever = Arc::new(MapRetriever::default().with_page("https://example.org/4", None));
    let (mut analyzer, _) = make_analyzer("k1", &[]);
    let paced = EnrichmentPipeline::new(
        PipelineConfig { batch_size: 50, record_delay: Duration::from_secs(1) },
        Arc::new(VecCatalogue(Some(records))),
        retriever,
        DatasetStore::new(&path),
    );

    let t0 = tokio::time::Instant::now();
    let report = paced.run(&mut analyzer).await.unwrap();

    // Rows 1, 3 and 4 reached retrieval; the incomplete row 2 did not.
    assert_eq!((report.enriched, report.skipped_invalid, report.skipped_no_content), (2, 1, 1));
    assert_eq!(t0.elapsed(), Duration::from_secs(3));
}
