//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{ExtractionStatus, SessionStatus};
use crate::storage::{
    AttemptResult, ChunkProgress, ClaimedAttempt, ExtractionRecord, NewExtraction, NewSession,
    RecoveryReport, RetryRecord, SessionRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Extraction not found: {0}")]
    ExtractionNotFound(i64),

    #[error("Invalid state transition for extraction {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: ExtractionStatus,
        to: ExtractionStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every mutating operation is atomic: it either commits all of its row
/// changes or none of them. Counter columns are only ever changed with
/// in-place increments, never read-modify-write.
pub trait Storage {
    // ===== Session Management =====

    /// Creates a session together with all of its extraction rows
    fn create_session(
        &mut self,
        session: &NewSession,
        extractions: &[NewExtraction],
    ) -> StorageResult<SessionRecord>;

    /// Gets a session by ID
    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord>;

    /// Lists sessions, newest first, optionally filtered by owner
    fn list_sessions(&self, user_id: Option<&str>) -> StorageResult<Vec<SessionRecord>>;

    /// Lists sessions currently in a given status
    fn list_sessions_by_status(&self, status: SessionStatus)
        -> StorageResult<Vec<SessionRecord>>;

    /// Moves a session from `from` to `to` if it is still in `from`
    ///
    /// Sets `completed_at` when `to` is terminal and clears it otherwise.
    /// Returns false when the session was not in `from`.
    fn transition_session(
        &mut self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> StorageResult<bool>;

    /// Inserts or replaces one key of the session's metadata map
    fn set_session_metadata(
        &mut self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()>;

    /// Deletes a session; extractions and retries cascade
    ///
    /// Returns false when no such session existed.
    fn delete_session(&mut self, session_id: &str) -> StorageResult<bool>;

    // ===== Attempt Lifecycle =====

    /// Claims the next claimable extraction of an in-progress session
    ///
    /// Picks the first pending row, or retrying row whose `next_attempt_at`
    /// is at or before `now_ms`, ordered by chunk number then position. The
    /// row moves to processing, its attempt count is incremented and an audit
    /// row for the new attempt is appended, all in one transaction.
    fn claim_next_extraction(
        &mut self,
        session_id: &str,
        now_ms: i64,
        retry_strategy: &str,
    ) -> StorageResult<Option<ClaimedAttempt>>;

    /// Persists the outcome of an attempt
    ///
    /// Updates the extraction row, finalizes the attempt's audit row and, for
    /// terminal outcomes, increments the owning session's counter, in one
    /// transaction.
    fn finish_attempt(
        &mut self,
        extraction_id: i64,
        attempt_number: u32,
        result: &AttemptResult,
    ) -> StorageResult<()>;

    /// Settles rows left in processing by a crashed or killed process
    fn recover_interrupted(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> StorageResult<RecoveryReport>;

    /// Moves an in-progress session to failed and settles its open rows
    ///
    /// Every pending, retrying or processing row becomes failed with
    /// `error_type = aborted`, open audit rows are finalized, `failed_urls`
    /// grows by the number of settled rows and `reason` is stored as the
    /// session's `failure_reason`, all in one transaction. Returns `None`
    /// when the session was no longer in progress.
    fn fail_session(&mut self, session_id: &str, reason: &str) -> StorageResult<Option<u64>>;

    /// Returns the earliest `next_attempt_at` among retrying rows
    fn earliest_next_attempt(&self, session_id: &str) -> StorageResult<Option<i64>>;

    // ===== Extraction Queries =====

    /// Gets an extraction by ID
    fn get_extraction(&self, extraction_id: i64) -> StorageResult<ExtractionRecord>;

    /// Finds the extraction of a URL within a session by URL hash
    fn find_extraction_by_hash(
        &self,
        session_id: &str,
        url_hash: &str,
    ) -> StorageResult<Option<ExtractionRecord>>;

    /// Lists a session's extractions ordered by chunk number then position
    fn list_extractions(&self, session_id: &str) -> StorageResult<Vec<ExtractionRecord>>;

    /// Lists the audit rows of an extraction ordered by attempt number
    fn list_retries(&self, extraction_id: i64) -> StorageResult<Vec<RetryRecord>>;

    /// Failed extractions with attempt budget left
    fn failed_retry_candidates(&self, session_id: &str)
        -> StorageResult<Vec<ExtractionRecord>>;

    /// Requeues failed extractions of a terminal session and reopens it
    ///
    /// Each row moves `failed -> retrying` (due at `now_ms`), `failed_urls`
    /// is decremented by the number of rows moved and the session returns
    /// to in_progress. Returns the number of rows requeued.
    fn reopen_failed(
        &mut self,
        session_id: &str,
        extraction_ids: &[i64],
        now_ms: i64,
    ) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts a session's extractions by status
    fn count_by_status(&self, session_id: &str)
        -> StorageResult<HashMap<ExtractionStatus, u64>>;

    /// Counts chunks with at least one non-pending row
    fn count_chunks_processed(&self, session_id: &str) -> StorageResult<u64>;

    /// Counts audit rows across the session's extractions
    fn count_session_retries(&self, session_id: &str) -> StorageResult<u64>;

    /// Mean processing time of rows where it is set
    fn average_processing_time(&self, session_id: &str) -> StorageResult<Option<f64>>;

    /// Failed rows grouped by error type
    fn error_breakdown(&self, session_id: &str) -> StorageResult<HashMap<String, u64>>;

    /// Per-chunk progress ordered by chunk number
    fn chunk_breakdown(&self, session_id: &str) -> StorageResult<Vec<ChunkProgress>>;
}
