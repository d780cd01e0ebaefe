//! Direct HTTP fetcher
//!
//! Fetches each URL with a single GET request. Redirects are followed by
//! reqwest (up to 10 hops) and HTML bodies are inspected for content metrics.

use crate::config::UserAgentConfig;
use crate::fetch::parser::summarize_page;
use crate::fetch::{transport_failure, FetchError, FetchOutcome, PageContent, PageFetcher};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use std::time::Duration;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Overall request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use batch_harvest::config::UserAgentConfig;
/// use batch_harvest::fetch::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     agent_name: "BatchHarvest".to_string(),
///     agent_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Page fetcher backed by a plain reqwest client
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_http_client(user_agent, timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(&e),
        };

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return FetchOutcome::Rejected {
                status: status.as_u16(),
                message: format!("HTTP {}", status),
            };
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return transport_failure(&e),
        };

        let summary = if is_html {
            Some(summarize_page(&String::from_utf8_lossy(&body), &final_url))
        } else {
            None
        };

        FetchOutcome::Page(PageContent {
            status: status.as_u16(),
            final_url: final_url.to_string(),
            bytes: body.len() as u64,
            links_found: summary.as_ref().map(|s| s.links_found()).unwrap_or(0),
            title: summary.and_then(|s| s.title),
        })
    }
}
