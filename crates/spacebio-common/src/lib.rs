//! spacebio-common: Shared types, errors, and the outbound HTTP client used
//! across all spacebio crates.

pub mod error;
pub mod models;
pub mod sandbox;

pub use error::{Result, SpacebioError};
pub use models::{CatalogueRecord, Category, EnrichedRecord, StructuredSummary};
