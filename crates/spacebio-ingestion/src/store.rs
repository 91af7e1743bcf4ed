//! JSON dataset of enriched records: the pipeline's only durable state.
//!
//! Records already on disk are carried as opaque JSON objects. They may have
//! been written by an older producer whose fields do not match
//! `EnrichedRecord` exactly, and a run must never drop them.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use spacebio_common::{EnrichedRecord, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error};

pub const DEFAULT_DATASET_PATH: &str = "./src/data/ai-generated-data.json";

/// One persisted record, kept verbatim.
pub type StoredRecord = Value;

#[derive(Debug, Clone)]
pub struct DatasetStore {
    path: PathBuf,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the dataset. A missing or empty file yields an empty dataset, as
    /// does one that is not a JSON array; a corrupt file is logged, never fatal.
    pub fn load(&self) -> Vec<StoredRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Could not read dataset. Starting from scratch.");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(records)) => {
                debug!(records = records.len(), "Dataset loaded");
                records
            }
            Ok(other) => {
                error!(path = %self.path.display(), kind = json_kind(&other), "Dataset is not a JSON array. Starting from scratch.");
                Vec::new()
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Could not parse dataset. Starting from scratch.");
                Vec::new()
            }
        }
    }

    /// Replace the dataset with `records`, pretty-printed. The file is written
    /// beside the target and renamed into place, so readers see either the old
    /// or the new dataset, never a partial one.
    pub fn save(&self, records: &[StoredRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), records = records.len(), "Dataset saved");
        Ok(())
    }
}

/// Convert freshly enriched records to their stored form.
pub fn to_stored(records: &[EnrichedRecord]) -> Result<Vec<StoredRecord>> {
    records
        .iter()
        .map(|r| serde_json::to_value(r).map_err(Into::into))
        .collect()
}

/// Numeric `id` of a stored record. Accepts a decimal string or a number.
pub fn stored_id(record: &StoredRecord) -> Option<usize> {
    match record.get("id")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        _ => None,
    }
}

/// Catalogue offset at which the next batch starts.
///
/// Normally the dataset length. When earlier runs skipped records the
/// highest persisted id is ahead of the length; resuming from there keeps ids
/// equal to catalogue positions and never reprocesses a persisted record.
pub fn next_offset(records: &[StoredRecord]) -> usize {
    let highest = records.iter().filter_map(stored_id).max().unwrap_or(0);
    highest.max(records.len())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
