use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::SpacebioError;

/// Default timeout for catalogue and article fetches.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client that only allows requests to approved hosts.
/// Every outbound call of the pipeline goes through one of these.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and no custom user agent.
    pub fn new() -> Result<Self, SpacebioError> {
        Self::with_settings(None, DEFAULT_TIMEOUT)
    }

    /// Creates a client that identifies itself as `user_agent` on every request.
    pub fn with_settings(user_agent: Option<&str>, timeout: Duration) -> Result<Self, SpacebioError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "raw.githubusercontent.com",         // catalogue CSV
            "www.ncbi.nlm.nih.gov",              // PMC article pages
            "pmc.ncbi.nlm.nih.gov",              // PMC article pages (new host)
            "generativelanguage.googleapis.com", // Gemini
            "localhost",
            "127.0.0.1",
        ];
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let mut builder = ClientBuilder::new().timeout(timeout);
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        let client = builder
            .build()
            .map_err(|e| SpacebioError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Adds the host of `url` to the allowlist. Returns false if the URL has no host.
    pub fn allow_url_host(&mut self, url: &str) -> bool {
        match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
            Some(host) => {
                self.allowlist.insert(host);
                true
            }
            None => false,
        }
    }

    /// Validates if a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                // Exact match or subdomain of an allowed host
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, SpacebioError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, SpacebioError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    fn check(&self, url: &str) -> Result<(), SpacebioError> {
        if !self.is_allowed(url) {
            return Err(SpacebioError::SecurityError(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }
        Ok(())
    }
}
