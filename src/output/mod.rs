//! Output module for session statistics and reports
//!
//! This module handles:
//! - Computing session statistics from persisted rows
//! - Building a session report with its failed extractions
//! - Rendering reports as markdown

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_report, generate_markdown_report};
pub use stats::{load_statistics, print_statistics, SessionStatistics};

use crate::state::ExtractionStatus;
use crate::storage::{SessionRecord, Storage, StorageError};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A URL that ended in the failed status
#[derive(Debug, Clone)]
pub struct FailedUrl {
    pub url: String,
    pub chunk_number: u32,
    pub attempts: u32,
    pub http_status: Option<u16>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// Everything a session report shows
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: SessionRecord,
    pub duration_seconds: Option<u64>,
    pub statistics: SessionStatistics,
    pub failed: Vec<FailedUrl>,
}

/// Builds a session report from storage
///
/// # Arguments
///
/// * `storage` - The storage backend containing the session
/// * `session_id` - The session to report on
///
/// # Returns
///
/// * `Ok(SessionReport)` - Successfully built report
/// * `Err(OutputError)` - The session does not exist or a query failed
pub fn generate_report(storage: &dyn Storage, session_id: &str) -> OutputResult<SessionReport> {
    let session = storage.get_session(session_id)?;
    let statistics = load_statistics(storage, &session)?;

    let failed = storage
        .list_extractions(session_id)?
        .into_iter()
        .filter(|row| row.status == ExtractionStatus::Failed)
        .map(|row| FailedUrl {
            url: row.url,
            chunk_number: row.chunk_number,
            attempts: row.attempt_count,
            http_status: row.http_status,
            error_type: row.error_type,
            error_message: row.error_message,
        })
        .collect();

    Ok(SessionReport {
        duration_seconds: session_duration(&session),
        session,
        statistics,
        failed,
    })
}

/// Seconds between start and completion, if the session has completed
fn session_duration(session: &SessionRecord) -> Option<u64> {
    let started = chrono::DateTime::parse_from_rfc3339(&session.started_at).ok()?;
    let finished = chrono::DateTime::parse_from_rfc3339(session.completed_at.as_deref()?).ok()?;
    u64::try_from((finished - started).num_seconds()).ok()
}
