//! Source catalogue: the ordered list of publications to enrich.
//!
//! The catalogue is a CSV document with a header row naming at least the
//! `Title` and `Link` columns. Row order is processing order.

use async_trait::async_trait;
use spacebio_common::sandbox::SandboxClient;
use spacebio_common::{CatalogueRecord, Result, SpacebioError};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CATALOGUE_URL: &str =
    "https://raw.githubusercontent.com/jgalazka/SB_publications/main/SB_publication_PMC.csv";

const TITLE_COLUMN: &str = "Title";
const LINK_COLUMN: &str = "Link";

/// Anything that can produce the full ordered catalogue.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    async fn load(&self) -> Result<Vec<CatalogueRecord>>;
}

/// Catalogue fetched over HTTP GET.
pub struct HttpCatalogue {
    client: SandboxClient,
    url: String,
}

impl HttpCatalogue {
    pub fn new(client: SandboxClient, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl CatalogueSource for HttpCatalogue {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<CatalogueRecord>> {
        info!(url = %self.url, "Fetching catalogue");
        let resp = self.client.get(&self.url)?.send().await?;
        if !resp.status().is_success() {
            return Err(SpacebioError::Catalogue(format!(
                "catalogue fetch returned HTTP {}",
                resp.status()
            )));
        }
        let body = resp.text().await?;
        let records = parse_catalogue(&body)?;
        info!(records = records.len(), "Catalogue loaded");
        Ok(records)
    }
}

/// Parse catalogue CSV. Every data row yields one record, so a record's index
/// is its catalogue position; rows without a title or link come back
/// incomplete for the caller to skip. A header without either column is an
/// error.
pub fn parse_catalogue(text: &str) -> Result<Vec<CatalogueRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| SpacebioError::Catalogue(format!("unreadable header row: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
    };
    let (Some(title_idx), Some(link_idx)) = (column(TITLE_COLUMN), column(LINK_COLUMN)) else {
        return Err(SpacebioError::Catalogue(format!(
            "header must contain `{TITLE_COLUMN}` and `{LINK_COLUMN}` columns, found {:?}",
            headers.iter().collect::<Vec<_>>()
        )));
    };

    let mut records = Vec::new();
    let mut incomplete = 0usize;
    for (row, result) in reader.records().enumerate() {
        let record = match result {
            Ok(row_data) => CatalogueRecord::new(
                row_data.get(title_idx).unwrap_or("").trim(),
                row_data.get(link_idx).unwrap_or("").trim(),
            ),
            Err(e) => {
                warn!(row = row + 1, error = %e, "Unreadable catalogue row");
                CatalogueRecord::new("", "")
            }
        };
        if !record.is_complete() {
            incomplete += 1;
        }
        records.push(record);
    }

    if incomplete > 0 {
        debug!(incomplete, "Catalogue rows without title or link");
    }
    Ok(records)
}
