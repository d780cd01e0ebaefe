//! Page fetching for Batch-Harvest
//!
//! This module contains the page fetcher seam used by the task executor:
//! - `PageFetcher`: trait implemented by every fetch backend
//! - `HttpPageFetcher`: fetches pages directly with reqwest
//! - `GatewayPageFetcher`: delegates fetching to a remote scraping gateway
//! - HTML inspection for content metrics

mod gateway;
mod http;
mod parser;

pub use gateway::GatewayPageFetcher;
pub use http::{build_http_client, HttpPageFetcher};
pub use parser::{summarize_page, PageSummary};

use crate::config::{Config, FetcherKind};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised while setting up or probing a fetcher
///
/// Per-URL failures are never reported through this type; they are
/// [`FetchOutcome`] values so a single URL can not abort a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Fetcher unavailable: {0}")]
    Unavailable(String),

    #[error("Fetcher misconfigured: {0}")]
    Config(String),
}

/// Content metrics of a page that answered with a success status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    /// Body size in bytes
    pub bytes: u64,
    pub links_found: u64,
    pub title: Option<String>,
}

/// Transport-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionReset,
    /// Connection could not be established (refused, DNS, TLS)
    ConnectionFailed,
    Other,
}

/// What happened when a URL was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was retrieved
    Page(PageContent),

    /// A server answered with a non-success status
    Rejected { status: u16, message: String },

    /// No usable HTTP response was received
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl FetchOutcome {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// HTTP status carried by the outcome, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Page(page) => Some(page.status),
            Self::Rejected { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    /// Human-readable failure description
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Page(_) => None,
            Self::Rejected { message, .. } | Self::Transport { message, .. } => {
                Some(message.clone())
            }
        }
    }
}

/// Retrieves a URL and reports content metrics or a failure
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Short label used in log messages
    fn name(&self) -> &'static str;

    /// Checks that the fetcher can accept work
    ///
    /// Called once before a session's workers start; an error here marks the
    /// session failed without any attempt being made.
    async fn ready(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetches one URL
    async fn fetch(&self, url: &str) -> FetchOutcome;

    /// Fetches one URL, abandoning internal retry waits once `cancel` fires
    ///
    /// A request already on the wire always completes; the outcome of the
    /// last request made is returned.
    async fn fetch_until(&self, url: &str, _cancel: &CancellationToken) -> FetchOutcome {
        self.fetch(url).await
    }

    /// Longest one fetch may run when a single request may take `attempt_timeout`
    ///
    /// Fetchers that retry internally stretch this over their whole retry cycle.
    fn attempt_deadline(&self, attempt_timeout: Duration) -> Duration {
        attempt_timeout
    }
}

/// Builds the fetcher selected by the configuration
pub fn build_fetcher(config: &Config) -> Result<Arc<dyn PageFetcher>, FetchError> {
    match config.fetcher.kind {
        FetcherKind::Http => Ok(Arc::new(HttpPageFetcher::new(
            &config.user_agent,
            config.batch.attempt_timeout(),
        )?)),
        FetcherKind::Gateway => {
            let gateway = config.gateway.as_ref().ok_or_else(|| {
                FetchError::Config("fetcher kind is gateway but [gateway] is missing".to_string())
            })?;
            Ok(Arc::new(GatewayPageFetcher::new(
                gateway,
                &config.user_agent,
                crate::batch::Backoff::from_config(&config.batch),
            )?))
        }
    }
}

/// Classifies a reqwest error into a transport failure
pub(crate) fn transport_failure(error: &reqwest::Error) -> FetchOutcome {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if matches!(
        io_error_kind(error),
        Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe)
    ) {
        TransportErrorKind::ConnectionReset
    } else if error.is_connect() {
        TransportErrorKind::ConnectionFailed
    } else {
        TransportErrorKind::Other
    };

    FetchOutcome::Transport {
        kind,
        message: error.to_string(),
    }
}

/// Finds the first `io::Error` in an error's source chain
fn io_error_kind(error: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut source = error.source();
    while let Some(inner) = source {
        if let Some(io_error) = inner.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
        source = inner.source();
    }
    None
}
