//! Audit records for inference calls.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::LlmResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceAuditEntry {
    pub id: Uuid,
    pub title: String,
    pub model: String,
    /// 1-based position of the credential in the pool.
    pub key_number: usize,
    pub attempt: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub output_hash: String,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl InferenceAuditEntry {
    pub fn new(
        title: &str,
        key_number: usize,
        attempt: u32,
        response: &LlmResponse,
        latency_ms: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(response.content.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            model: response.model.clone(),
            key_number,
            attempt,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            output_hash,
            latency_ms,
            called_at: Utc::now(),
        }
    }

    /// Emit the entry on the `spacebio::audit` tracing target.
    pub fn record(&self) {
        tracing::debug!(
            target: "spacebio::audit",
            id = %self.id,
            model = %self.model,
            key = self.key_number,
            attempt = self.attempt,
            prompt_tokens = self.prompt_tokens,
            completion_tokens = self.completion_tokens,
            output_hash = %self.output_hash,
            latency_ms = self.latency_ms,
            "inference call"
        );
    }
}
