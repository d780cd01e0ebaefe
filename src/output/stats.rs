//! Statistics generation from the extraction database
//!
//! Every figure is computed on read from persisted rows; nothing here is
//! cached or updated incrementally.

use crate::state::ExtractionStatus;
use crate::storage::{ChunkProgress, SessionRecord, Storage, StorageResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Session statistics summary
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub total_urls: u32,
    pub successful_urls: u32,
    pub failed_urls: u32,

    /// `successful_urls / total_urls * 100`, 0 for an empty session
    pub success_rate: f64,

    /// Distinct chunks with at least one non-pending row
    pub chunks_processed: u64,

    /// Distinct chunks in the session
    pub total_chunks: u64,

    /// Attempt audit rows across all extractions
    pub total_retries: u64,

    /// Mean processing time (ms) over rows where it is set
    pub average_processing_time_ms: Option<f64>,

    /// Failed rows grouped by error type
    pub error_breakdown: BTreeMap<String, u64>,

    /// Rows per extraction status
    pub status_counts: BTreeMap<String, u64>,

    pub chunks: Vec<ChunkStatistics>,
}

/// Progress of one chunk
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkStatistics {
    pub chunk_number: u32,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub pending: u64,
}

impl From<ChunkProgress> for ChunkStatistics {
    fn from(chunk: ChunkProgress) -> Self {
        Self {
            chunk_number: chunk.chunk_number,
            total: chunk.total,
            succeeded: chunk.succeeded,
            failed: chunk.failed,
            pending: chunk.pending,
        }
    }
}

/// Computes a success rate percentage
pub fn success_rate(successful: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}

/// Loads statistics for a session from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `session` - The session whose rows are summarized
///
/// # Returns
///
/// * `Ok(SessionStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    session: &SessionRecord,
) -> StorageResult<SessionStatistics> {
    let session_id = session.id.as_str();

    let chunks: Vec<ChunkStatistics> = storage
        .chunk_breakdown(session_id)?
        .into_iter()
        .map(ChunkStatistics::from)
        .collect();

    let status_counts = storage
        .count_by_status(session_id)?
        .into_iter()
        .map(|(status, count)| (status.to_db_string().to_string(), count))
        .collect();

    Ok(SessionStatistics {
        total_urls: session.total_urls,
        successful_urls: session.successful_urls,
        failed_urls: session.failed_urls,
        success_rate: success_rate(session.successful_urls, session.total_urls),
        chunks_processed: storage.count_chunks_processed(session_id)?,
        total_chunks: chunks.len() as u64,
        total_retries: storage.count_session_retries(session_id)?,
        average_processing_time_ms: storage.average_processing_time(session_id)?,
        error_breakdown: storage.error_breakdown(session_id)?.into_iter().collect(),
        status_counts,
        chunks,
    })
}

/// Prints statistics to stdout in a human-readable format
pub fn print_statistics(stats: &SessionStatistics) {
    println!("=== Session Statistics ===\n");

    println!("Overview:");
    println!("  Total URLs: {}", stats.total_urls);
    println!("  Successful: {}", stats.successful_urls);
    println!("  Failed: {}", stats.failed_urls);
    println!("  Success rate: {:.1}%", stats.success_rate);
    println!(
        "  Chunks processed: {}/{}",
        stats.chunks_processed, stats.total_chunks
    );
    println!("  Attempts recorded: {}", stats.total_retries);
    match stats.average_processing_time_ms {
        Some(avg) => println!("  Average processing time: {:.0} ms", avg),
        None => println!("  Average processing time: n/a"),
    }
    println!();

    println!("URLs by Status:");
    for status in ExtractionStatus::all_states() {
        if let Some(count) = stats.status_counts.get(status.to_db_string()) {
            println!("  {}: {}", status, count);
        }
    }
    println!();

    if !stats.error_breakdown.is_empty() {
        println!("Error Breakdown:");
        for (error_type, count) in &stats.error_breakdown {
            println!("  {}: {}", error_type, count);
        }
        println!();
    }

    if stats.chunks.len() > 1 {
        println!("Chunks:");
        for chunk in &stats.chunks {
            println!(
                "  #{}: {}/{} succeeded, {} failed, {} pending",
                chunk.chunk_number, chunk.succeeded, chunk.total, chunk.failed, chunk.pending
            );
        }
        println!();
    }
}
