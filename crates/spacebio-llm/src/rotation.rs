//! Credential pool and forward-only key rotation.
//!
//! `RotationState` is the plain cursor over the pool; `KeyRotation` pairs it
//! with the backend currently bound to the active key. Keys are only ever
//! referred to by their 1-based number in logs.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use spacebio_common::sandbox::SandboxClient;
use tracing::{error, info};

use crate::backend::{GeminiBackend, LlmBackend, LlmError};

/// One credential for the inference service.
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Split a comma-separated key list. Blank entries are dropped.
    pub fn parse_list(raw: &str) -> Vec<ApiKey> {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ApiKey::new)
            .collect()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Ordered credential pool with a cursor that only moves forward.
#[derive(Debug)]
pub struct RotationState {
    pool: Vec<ApiKey>,
    index: usize,
}

impl RotationState {
    pub fn new(pool: Vec<ApiKey>) -> Result<Self, LlmError> {
        if pool.is_empty() {
            return Err(LlmError::Unavailable("credential pool is empty".to_string()));
        }
        Ok(Self { pool, index: 0 })
    }

    /// Number of keys in the pool.
    pub fn size(&self) -> usize {
        self.pool.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The active key, or `None` once the pool is exhausted.
    pub fn current(&self) -> Option<&ApiKey> {
        self.pool.get(self.index)
    }

    /// Move to the next key. Returns false when no usable key remains.
    pub fn advance(&mut self) -> bool {
        if self.index < self.pool.len() {
            self.index += 1;
        }
        self.index < self.pool.len()
    }
}

/// Builds a backend bound to a specific credential.
pub trait BackendFactory: Send + Sync {
    fn bind(&self, key: &ApiKey) -> Arc<dyn LlmBackend>;
}

/// Factory for Gemini backends sharing one HTTP client.
pub struct GeminiFactory {
    client: SandboxClient,
    model: String,
    base_url: Option<String>,
}

impl GeminiFactory {
    pub fn new(client: SandboxClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into(), base_url: None }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl BackendFactory for GeminiFactory {
    fn bind(&self, key: &ApiKey) -> Arc<dyn LlmBackend> {
        let backend = GeminiBackend::new(
            self.client.clone(),
            SecretString::from(key.expose().to_string()),
            self.model.clone(),
        );
        match &self.base_url {
            Some(url) => Arc::new(backend.with_base_url(url)),
            None => Arc::new(backend),
        }
    }
}

/// The active credential and the backend bound to it.
pub struct KeyRotation {
    state: RotationState,
    factory: Arc<dyn BackendFactory>,
    backend: Arc<dyn LlmBackend>,
}

impl KeyRotation {
    /// Bind the first key of the pool. This is not a rotation: the cursor
    /// stays at 0.
    pub fn new(state: RotationState, factory: Arc<dyn BackendFactory>) -> Result<Self, LlmError> {
        let key = state.current()
            .ok_or_else(|| LlmError::Unavailable("credential pool is empty".to_string()))?;
        let backend = factory.bind(key);
        info!(keys = state.size(), "Using API key #1");
        Ok(Self { state, factory, backend })
    }

    pub fn backend(&self) -> Arc<dyn LlmBackend> {
        self.backend.clone()
    }

    /// 1-based number of the active key, for logs.
    pub fn key_number(&self) -> usize {
        self.state.index() + 1
    }

    pub fn pool_size(&self) -> usize {
        self.state.size()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.current().is_none()
    }

    /// Fail over to the next key and rebind the backend.
    /// Returns false when every key has been used up.
    pub fn rotate(&mut self) -> bool {
        if !self.state.advance() {
            error!(keys = self.state.size(), "All API keys have exceeded their quotas");
            return false;
        }
        let Some(key) = self.state.current() else {
            return false;
        };
        self.backend = self.factory.bind(key);
        info!("Switching to API key #{}", self.key_number());
        true
    }
}
