//! Full-text retrieval from publication pages.
//!
//! Pages are assumed to follow the PMC article template, with named regions
//! for the abstract and the main body. The selectors are data
//! (`ScraperConfig`), so template drift is handled by configuration, not code.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use spacebio_common::sandbox::SandboxClient;
use spacebio_common::SpacebioError;
use tracing::{debug, instrument, warn};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Produces the best-effort plain-text body of a publication.
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// `None` when the page could not be fetched at all.
    async fn fetch(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub abstract_selector: String,
    pub body_selector: String,
    /// Used only when neither the abstract nor the body yields text.
    pub fallback_selector: String,
    /// Below this many characters a warning is logged; the text is still returned.
    pub min_chars: usize,
    /// Hard cap on returned text, in characters.
    pub max_chars: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            abstract_selector: "section.abstract, div.abstract, section#abstract1".to_string(),
            body_selector: "section.body.main-article-body".to_string(),
            fallback_selector: "div#body, div#maincontent, div.journal-article".to_string(),
            min_chars: 200,
            max_chars: 30_000,
        }
    }
}

/// Scraper for PMC-style article pages.
pub struct PmcScraper {
    client: SandboxClient,
    cfg: ScraperConfig,
    abstract_sel: Selector,
    body_sel: Selector,
    fallback_sel: Selector,
}

impl PmcScraper {
    pub fn new(client: SandboxClient, cfg: ScraperConfig) -> Result<Self, SpacebioError> {
        let parse = |css: &str| {
            Selector::parse(css)
                .map_err(|e| SpacebioError::Config(format!("invalid selector {css:?}: {e}")))
        };
        Ok(Self {
            abstract_sel: parse(&cfg.abstract_selector)?,
            body_sel: parse(&cfg.body_selector)?,
            fallback_sel: parse(&cfg.fallback_selector)?,
            client,
            cfg,
        })
    }

    async fn download(&self, url: &str) -> anyhow::Result<String> {
        let resp = self.client
            .get(url)?
            .header(reqwest::header::USER_AGENT, &self.cfg.user_agent)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("HTTP {}", resp.status());
        }
        Ok(resp.text().await?)
    }

    /// Extract, normalise and truncate the article text from an HTML page.
    pub fn extract_text(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let mut parts = Vec::new();

        let abstract_text = select_text(&document, &self.abstract_sel);
        if !abstract_text.is_empty() {
            parts.push(format!("Abstract:\n{abstract_text}"));
        }

        let body_text = select_text(&document, &self.body_sel);
        if !body_text.is_empty() {
            parts.push(format!("Main Body:\n{body_text}"));
        }

        if parts.is_empty() {
            let fallback = select_text(&document, &self.fallback_sel);
            if !fallback.is_empty() {
                parts.push(fallback);
            }
        }

        normalise(&parts.join("\n\n"), self.cfg.max_chars)
    }
}

#[async_trait]
impl ContentRetriever for PmcScraper {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Option<String> {
        let html = match self.download(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Failed to scrape {}", url);
                return None;
            }
        };

        let text = self.extract_text(&html);
        let chars = text.chars().count();
        if chars < self.cfg.min_chars {
            warn!(chars, "Scraper found little/no text for {}", url);
        } else {
            debug!(chars, "Article text extracted");
        }
        Some(text)
    }
}

fn select_text(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Collapse whitespace runs to single spaces and cap at `max_chars` characters.
pub fn normalise(text: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE.replace_all(text, " ");
    let trimmed = collapsed.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}
