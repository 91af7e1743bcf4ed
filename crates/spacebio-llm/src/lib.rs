//! spacebio-llm: Inference client for publication summaries.
//!
//! - `backend`: the `LlmBackend` trait and the Gemini REST implementation
//! - `rotation`: credential pool with forward-only failover
//! - `analyzer`: prompt, response parsing, schema validation, retry policy
//! - `audit`: per-call audit records

pub mod backend;
pub mod rotation;
pub mod analyzer;
pub mod audit;

pub use analyzer::{Analyzer, AnalyzerConfig, InferenceError};
pub use backend::{GeminiBackend, LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
pub use rotation::{ApiKey, BackendFactory, GeminiFactory, KeyRotation, RotationState};
