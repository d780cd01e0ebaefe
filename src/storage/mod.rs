//! Storage module for persisting campaign data
//!
//! This module handles all database operations for the orchestrator, including:
//! - SQLite database initialization and schema management
//! - Session, extraction and retry-audit persistence
//! - Atomic claim/finish of extraction attempts
//! - Crash recovery of interrupted attempts
//! - Statistics queries

mod schema;
mod sqlite;
mod traits;

pub use schema::{get_schema_version, initialize_schema};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{ExtractionStatus, SessionStatus};
use crate::HarvestError;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Free-form JSON object attached to sessions and extractions
pub type Metadata = Map<String, Value>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Storage handle shared between the controller and its workers
///
/// The backend sits behind a mutex; every call holds the lock for a single
/// storage operation and never across an `.await`.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<Mutex<Box<dyn Storage + Send>>>,
}

impl SharedStorage {
    pub fn new<S: Storage + Send + 'static>(storage: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// Runs `f` with exclusive access to the backend
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.inner.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut **guard)
    }
}

/// Values needed to create a session
///
/// Built through [`NewSession::new`] so every field (id, name, metadata) is
/// initialized before anything is written.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub source_url: String,
    pub chunk_size: u32,
    pub max_retries: u32,
    pub metadata: Metadata,
}

impl NewSession {
    pub fn new(
        user_id: &str,
        name: Option<&str>,
        source_url: &str,
        chunk_size: u32,
        max_retries: u32,
    ) -> Self {
        let name = name
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Batch extraction {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
                )
            });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            source_url: source_url.to_string(),
            chunk_size,
            max_retries,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Values needed to create one extraction row
#[derive(Debug, Clone)]
pub struct NewExtraction {
    pub url: String,
    pub url_hash: String,
    pub chunk_number: u32,
    pub position_in_chunk: u32,
    pub chunk_size: u32,
    pub max_retries: u32,
    pub metadata: Metadata,
}

/// Represents a session in the database
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub source_url: String,
    pub total_urls: u32,
    pub successful_urls: u32,
    pub failed_urls: u32,
    pub chunk_size: u32,
    pub max_retries: u32,
    pub status: SessionStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub metadata: Metadata,
}

impl SessionRecord {
    /// Percentage of URLs that reached a terminal outcome
    pub fn progress_percent(&self) -> f64 {
        if self.total_urls == 0 {
            return 0.0;
        }
        (self.successful_urls + self.failed_urls) as f64 / self.total_urls as f64 * 100.0
    }
}

/// Represents one URL's extraction in the database
#[derive(Debug, Clone)]
pub struct ExtractionRecord {
    pub id: i64,
    pub session_id: String,
    pub url: String,
    pub url_hash: String,
    pub chunk_number: u32,
    pub position_in_chunk: u32,
    pub chunk_size: u32,
    pub status: ExtractionStatus,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub http_status: Option<u16>,
    pub processing_time_ms: Option<i64>,
    pub bytes_found: Option<i64>,
    pub links_found: Option<i64>,
    pub final_url: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub last_error_at: Option<String>,
    /// Unix epoch milliseconds before which a retrying row is not claimable
    pub next_attempt_at: Option<i64>,
    pub metadata: Metadata,
    pub created_at: String,
    pub updated_at: String,
}

impl ExtractionRecord {
    /// Whether another attempt may follow a retryable failure
    pub fn has_retry_budget(&self) -> bool {
        self.attempt_count < self.max_retries
    }
}

/// Represents one attempt's audit row
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub id: i64,
    pub extraction_id: i64,
    pub attempt_number: u32,
    pub status: ExtractionStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub http_status: Option<u16>,
    pub retry_strategy: String,
    pub created_at: String,
}

/// An extraction claimed for a new attempt
#[derive(Debug, Clone)]
pub struct ClaimedAttempt {
    pub extraction: ExtractionRecord,
    /// Attempt number of the audit row opened by the claim
    pub attempt_number: u32,
}

/// Outcome of an attempt, persisted by [`Storage::finish_attempt`]
#[derive(Debug, Clone)]
pub struct AttemptResult {
    /// One of `Success`, `Failed` or `Retrying`
    pub status: ExtractionStatus,
    pub http_status: Option<u16>,
    pub processing_time_ms: i64,
    pub bytes_found: Option<i64>,
    pub links_found: Option<i64>,
    pub final_url: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    /// Epoch milliseconds of the next attempt, set for `Retrying`
    pub next_attempt_at: Option<i64>,
}

/// Rows changed by crash recovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted rows put back in the queue
    pub requeued: u64,
    /// Interrupted rows that had no budget left
    pub failed: u64,
}

/// Per-chunk progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk_number: u32,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub pending: u64,
}
