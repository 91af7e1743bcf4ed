//! Publication analyzer: turns article text into a validated
//! `StructuredSummary`.
//!
//! Retry policy per record:
//!   - quota rejection → rotate the key, reset the attempt counter, retry
//!     at once; an exhausted pool is fatal for the whole run
//!   - any other failure (transport, malformed JSON, schema violation) →
//!     wait `retry_delay` and retry, up to `max_attempts`; then give up on
//!     the record

use std::time::{Duration, Instant};

use chrono::Datelike;
use serde_json::Value;
use spacebio_common::{Category, StructuredSummary};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::audit::InferenceAuditEntry;
use crate::backend::{LlmError, LlmRequest, Message};
use crate::rotation::KeyRotation;

/// Failures that end the run, not just the record.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("all {keys} API keys exhausted")]
    KeysExhausted { keys: usize },
}

/// Why one attempt failed. Everything except `Llm` quota errors is retryable.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("response did not contain valid JSON: {0}")]
    Malformed(String),
    #[error("schema violation: {0}")]
    Schema(String),
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            max_output_tokens: 8192,
            temperature: 0.1,
        }
    }
}

pub struct Analyzer {
    rotation: KeyRotation,
    cfg: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(rotation: KeyRotation, cfg: AnalyzerConfig) -> Self {
        Self { rotation, cfg }
    }

    pub fn rotation(&self) -> &KeyRotation {
        &self.rotation
    }

    /// Summarise one publication.
    ///
    /// `Ok(None)` means the record should be skipped; `Err` means the run
    /// cannot continue.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn analyze(
        &mut self,
        text: &str,
        title: &str,
    ) -> Result<Option<StructuredSummary>, InferenceError> {
        if self.rotation.is_exhausted() {
            return Err(InferenceError::KeysExhausted { keys: self.rotation.pool_size() });
        }
        let year = current_year();
        let prompt = build_prompt(text, title, year);
        let max = self.cfg.max_attempts.max(1);

        let mut attempt = 1;
        while attempt <= max {
            match self.attempt(&prompt, title, attempt, year).await {
                Ok(summary) => return Ok(Some(summary)),
                Err(AttemptError::Llm(e)) if e.is_quota_exceeded() => {
                    warn!("Quota exceeded for key #{}", self.rotation.key_number());
                    if !self.rotation.rotate() {
                        return Err(InferenceError::KeysExhausted { keys: self.rotation.pool_size() });
                    }
                    attempt = 1;
                    continue;
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "AI analysis for \"{}\" failed", title);
                    if attempt == max {
                        error!(error = %e, "Final attempt failed, skipping article \"{}\"", title);
                        return Ok(None);
                    }
                    tokio::time::sleep(self.cfg.retry_delay).await;
                    attempt += 1;
                }
            }
        }
        Ok(None)
    }

    async fn attempt(
        &self,
        prompt: &str,
        title: &str,
        attempt: u32,
        year: i32,
    ) -> Result<StructuredSummary, AttemptError> {
        let backend = self.rotation.backend();
        let req = LlmRequest {
            messages: vec![Message::user(prompt)],
            max_tokens: Some(self.cfg.max_output_tokens),
            temperature: Some(self.cfg.temperature),
        };

        let t0 = Instant::now();
        let resp = backend.complete(req).await?;
        InferenceAuditEntry::new(
            title,
            self.rotation.key_number(),
            attempt,
            &resp,
            t0.elapsed().as_millis() as u64,
        )
        .record();

        let value = extract_json(&resp.content)?;
        let summary = validate_summary(&value, year).map_err(AttemptError::Schema)?;
        debug!(category = %summary.category, year = summary.year, "Summary validated");
        Ok(summary)
    }
}

fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// Fixed prompt template. The model must answer with a bare JSON object.
pub fn build_prompt(text: &str, title: &str, year: i32) -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a research assistant specializing in space biology.
Analyze the following research paper text. Based *only* on the text provided, return a JSON object with the following structure:
{{
  "summary": "A concise, easy-to-understand summary and key findings of the research (7-10 sentences).",
  "category": "The most relevant category from this list: [{categories}].",
  "year": "The publication year (as a number). If not found, use {year}.",
  "keywords": ["An array of 5-7 relevant keywords."]
}}
Return only the JSON object, without commentary.

Original Title: "{title}"
Paper Text: "{text}""#
    )
}

/// Pull the JSON object out of a model response, tolerating Markdown fences
/// and stray prose around the object.
fn extract_json(content: &str) -> Result<Value, AttemptError> {
    let stripped = content.replace("```json", "").replace("```", "");
    let stripped = stripped.trim();

    let candidate = match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => stripped,
    };

    serde_json::from_str(candidate).map_err(|e| AttemptError::Malformed(e.to_string()))
}

/// Validate an untrusted response payload against the summary schema.
pub fn validate_summary(value: &Value, default_year: i32) -> Result<StructuredSummary, String> {
    let obj = value.as_object().ok_or("response is not a JSON object")?;

    let summary = obj.get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("`summary` must be a non-empty string")?
        .to_string();

    let raw_category = obj.get("category")
        .and_then(Value::as_str)
        .ok_or("`category` must be a string")?;
    let category = Category::from_label(raw_category)
        .ok_or_else(|| format!("`category` {raw_category:?} is not in the taxonomy"))?;

    let year = match obj.get("year") {
        None | Some(Value::Null) => default_year,
        Some(Value::Number(n)) => n.as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| format!("`year` {n} is not an integer"))?,
        Some(Value::String(s)) => s.trim().parse::<i32>()
            .map_err(|_| format!("`year` {s:?} is not numeric"))?,
        Some(other) => return Err(format!("`year` has unexpected type: {other}")),
    };

    let keywords: Vec<String> = obj.get("keywords")
        .and_then(Value::as_array)
        .ok_or("`keywords` must be an array")?
        .iter()
        .map(|k| {
            k.as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .ok_or_else(|| "`keywords` entries must be non-empty strings".to_string())
        })
        .collect::<Result<_, _>>()?;
    if !(5..=7).contains(&keywords.len()) {
        return Err(format!("`keywords` must have 5-7 entries, got {}", keywords.len()));
    }

    Ok(StructuredSummary { summary, category, year, keywords })
}
