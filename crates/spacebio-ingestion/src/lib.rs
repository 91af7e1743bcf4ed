//! spacebio-ingestion: Publication enrichment pipeline.
//! - Catalogue loading (CSV of title + link)
//! - Full-text retrieval from article pages
//! - Dataset persistence (JSON array of enriched records)
//! - Batch orchestration with resumption and pacing

pub mod catalogue;
pub mod retriever;
pub mod store;
pub mod pipeline;
