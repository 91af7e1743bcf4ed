//! LLM backend trait and the Gemini implementation.
//!
//! The pipeline only needs text completion, so the trait is deliberately
//! small. Rotation rebinds a fresh backend per credential through
//! `rotation::BackendFactory`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use spacebio_common::sandbox::SandboxClient;
use spacebio_common::SpacebioError;
use thiserror::Error;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Request blocked: {0}")]
    Blocked(#[from] SpacebioError),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
}

impl LlmError {
    /// True when the service rejected the call because the credential's
    /// quota is spent. Such failures trigger key rotation instead of a retry.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            LlmError::ApiError { status: 429, .. } => true,
            LlmError::ApiError { message, .. } => message.contains("RESOURCE_EXHAUSTED"),
            _ => false,
        }
    }
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,   // Gemini role: "user" | "model"
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    fn model_id(&self) -> &str;
}

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if status >= 400 {
        // Error bodies are usually JSON but proxies may answer with plain text.
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| {
                let msg = body["error"]["message"].as_str().or_else(|| body["message"].as_str())?;
                let code = body["error"]["status"].as_str().unwrap_or("");
                Some(if code.is_empty() { msg.to_string() } else { format!("{code}: {msg}") })
            })
            .unwrap_or_else(|| text.trim().to_string());
        return Err(LlmError::ApiError { status, message });
    }
    Ok(serde_json::from_str(&text)?)
}

// ── Google Gemini ─────────────────────────────────────────────────────────────

pub struct GeminiBackend {
    pub model: String,
    base_url: String,
    api_key: SecretString,
    client: SandboxClient,
}

impl GeminiBackend {
    pub fn new(client: SandboxClient, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
            api_key,
            client,
        }
    }

    /// Point the backend at a different host (proxies, local test servers).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let contents: Vec<serde_json::Value> = req.messages.iter()
            .map(|m| serde_json::json!({
                "role": m.role,
                "parts": [{ "text": m.content }]
            }))
            .collect();

        let body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens.unwrap_or(8192),
                "temperature":     req.temperature.unwrap_or(0.1),
            }
        });

        let resp = self.client
            .post(&self.endpoint())?
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        // Responses may split text across several parts.
        let content = json["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts.iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let prompt_tokens = json["usageMetadata"]["promptTokenCount"]
            .as_u64().unwrap_or(0) as u32;
        let completion_tokens = json["usageMetadata"]["candidatesTokenCount"]
            .as_u64().unwrap_or(0) as u32;

        Ok(LlmResponse {
            content,
            model: json["modelVersion"].as_str().unwrap_or(&self.model).to_string(),
            prompt_tokens,
            completion_tokens,
        })
    }

    fn model_id(&self) -> &str { &self.model }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
