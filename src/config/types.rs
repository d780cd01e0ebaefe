use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Batch-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    pub output: OutputConfig,
}

/// Batch orchestration behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchConfig {
    /// Chunk size used when a batch does not specify one
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u32,

    /// Retry budget used when a batch does not specify one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Upper bound on the number of URLs accepted by a single batch
    #[serde(default = "default_max_urls_per_batch")]
    pub max_urls_per_batch: usize,

    /// Number of workers per running session
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-attempt timeout for the page fetcher (milliseconds)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Base delay of the exponential backoff (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Optional cap on a single backoff delay (milliseconds)
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,

    /// How failed extractions are retried
    #[serde(default)]
    pub retry_mode: RetryMode,
}

impl BatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            default_max_retries: default_max_retries(),
            max_urls_per_batch: default_max_urls_per_batch(),
            concurrency: default_concurrency(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: None,
            retry_mode: RetryMode::default(),
        }
    }
}

/// Strategy for the retry-failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryMode {
    /// Create a new session scoped to the failed extractions
    #[default]
    Derive,
    /// Reopen the original session and requeue its failed extractions
    Reopen,
}

/// Which page fetcher implementation to use
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetcherConfig {
    #[serde(default)]
    pub kind: FetcherKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetcherKind {
    /// Fetch pages directly over HTTP
    #[default]
    Http,
    /// Delegate fetching to a remote scraping gateway
    Gateway,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the harvester
    pub agent_name: String,

    /// Version of the harvester
    pub agent_version: String,

    /// URL with information about the harvester
    pub contact_url: String,

    /// Email address for harvester-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the user agent header value
    ///
    /// Format: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.agent_name, self.agent_version, self.contact_url, self.contact_email
        )
    }
}

/// Remote scraping gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    /// Base URL of the gateway (e.g. `http://localhost:3002`)
    pub base_url: String,

    /// Optional bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout (milliseconds)
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of attempts the gateway client makes per fetch
    #[serde(default = "default_gateway_max_retries")]
    pub max_retries: u32,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Directory where markdown session reports are written
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
}

fn default_chunk_size() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_urls_per_batch() -> usize {
    25
}

fn default_concurrency() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_gateway_timeout_ms() -> u64 {
    60_000
}

fn default_gateway_max_retries() -> u32 {
    3
}

fn default_report_dir() -> String {
    "./reports".to_string()
}
