//! Remote scraping gateway client
//!
//! Delegates fetching to a gateway service:
//!
//! - `GET {base}/health` must answer 2xx before a session starts
//! - `POST {base}/v1/scrape` with `{"url": "..."}` returns a [`ScrapeResponse`]
//!
//! Gateway-level failures (429, 5xx, timeouts, resets) are retried inside
//! the client up to `max_retries` requests in total with exponential backoff.
//! Client errors are returned immediately. Each request is bounded by the
//! gateway's `timeout-ms`, and the fetcher reports its whole retry cycle as
//! its attempt deadline so the executor never cuts a cycle short.

use crate::batch::{classify, Backoff};
use crate::config::{GatewayConfig, UserAgentConfig};
use crate::fetch::{
    build_http_client, transport_failure, FetchError, FetchOutcome, PageContent, PageFetcher,
    TransportErrorKind,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
}

/// Body returned by `POST /v1/scrape`
#[derive(Debug, Deserialize)]
pub struct ScrapeResponse {
    /// Status the target site answered with
    pub status_code: u16,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub links_found: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Page fetcher that calls a remote scraping gateway
pub struct GatewayPageFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    request_timeout: Duration,
    backoff: Backoff,
}

impl GatewayPageFetcher {
    pub fn new(
        config: &GatewayConfig,
        user_agent: &UserAgentConfig,
        backoff: Backoff,
    ) -> Result<Self, FetchError> {
        if config.max_retries == 0 {
            return Err(FetchError::Config(
                "gateway max-retries must be at least 1".to_string(),
            ));
        }

        let request_timeout = Duration::from_millis(config.timeout_ms);
        Ok(Self {
            client: build_http_client(user_agent, request_timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            request_timeout,
            backoff,
        })
    }

    /// Worst-case duration of one fetch: every request times out and every
    /// backoff wait runs in full
    pub fn retry_cycle(&self) -> Duration {
        (1..self.max_retries)
            .map(|request| self.backoff.delay(request))
            .fold(
                self.request_timeout
                    .checked_mul(self.max_retries)
                    .unwrap_or(Duration::MAX),
                Duration::saturating_add,
            )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn scrape_once(&self, url: &str) -> FetchOutcome {
        let mut request = self
            .client
            .post(self.endpoint("/v1/scrape"))
            .json(&ScrapeRequest { url });

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(&e),
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return FetchOutcome::Rejected {
                status: status.as_u16(),
                message: format!("Gateway returned HTTP {}: {}", status, detail.trim()),
            };
        }

        match response.json::<ScrapeResponse>().await {
            Ok(body) => page_outcome(url, body),
            Err(e) if e.is_decode() => FetchOutcome::Transport {
                kind: TransportErrorKind::Other,
                message: format!("Malformed gateway response: {}", e),
            },
            Err(e) => transport_failure(&e),
        }
    }
}

/// Converts a gateway report of the target's answer into an outcome
fn page_outcome(url: &str, body: ScrapeResponse) -> FetchOutcome {
    if (200..300).contains(&body.status_code) {
        FetchOutcome::Page(PageContent {
            status: body.status_code,
            final_url: body.final_url.unwrap_or_else(|| url.to_string()),
            bytes: body.content_length,
            links_found: body.links_found,
            title: body.title,
        })
    } else {
        FetchOutcome::Rejected {
            status: body.status_code,
            message: body
                .error
                .unwrap_or_else(|| format!("Target returned HTTP {}", body.status_code)),
        }
    }
}

#[async_trait]
impl PageFetcher for GatewayPageFetcher {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn ready(&self) -> Result<(), FetchError> {
        let response = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(format!("{}: {}", self.base_url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(FetchError::Unavailable(format!(
                "{} health check returned HTTP {}",
                self.base_url,
                response.status()
            )))
        }
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_until(url, &CancellationToken::new()).await
    }

    async fn fetch_until(&self, url: &str, cancel: &CancellationToken) -> FetchOutcome {
        let mut request_number = 1;

        loop {
            let outcome = self.scrape_once(url).await;

            if !classify(&outcome).is_retryable() || request_number >= self.max_retries {
                return outcome;
            }

            let delay = self.backoff.delay(request_number);
            tracing::debug!(
                "Gateway request {} for {} failed transiently, retrying in {:?}",
                request_number,
                url,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(
                        "Gateway retries for {} abandoned after {} request(s)",
                        url,
                        request_number
                    );
                    return outcome;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            request_number += 1;
        }
    }

    fn attempt_deadline(&self, attempt_timeout: Duration) -> Duration {
        attempt_timeout.max(self.retry_cycle())
    }
}
