//! Markdown report generation
//!
//! This module renders a session report as a human-readable markdown file,
//! including statistics, the error breakdown, chunk progress and the URLs
//! that failed.

use crate::output::{OutputResult, SessionReport};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Failed URLs listed before the table is truncated
const MAX_FAILED_ROWS: usize = 100;

/// Writes a session report to `output_path`
///
/// # Arguments
///
/// * `report` - The session report data
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn generate_markdown_report(report: &SessionReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a session report as markdown
pub fn format_markdown_report(report: &SessionReport) -> String {
    let session = &report.session;
    let stats = &report.statistics;
    let mut md = String::new();

    md.push_str(&format!("# Batch Extraction Report: {}\n\n", session.name));

    // Session metadata
    md.push_str("## Session Information\n\n");
    md.push_str(&format!("- **Session ID**: {}\n", session.id));
    md.push_str(&format!("- **User**: {}\n", session.user_id));
    md.push_str(&format!("- **Source**: {}\n", session.source_url));
    md.push_str(&format!("- **Status**: {}\n", session.status));
    md.push_str(&format!("- **Started**: {}\n", session.started_at));
    if let Some(completed) = &session.completed_at {
        md.push_str(&format!("- **Completed**: {}\n", completed));
    }
    if let Some(duration) = report.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!(
        "- **Chunk Size**: {} | **Max Retries**: {}\n",
        session.chunk_size, session.max_retries
    ));
    if let Some(parent) = session.metadata.get("parent_session_id").and_then(|v| v.as_str()) {
        md.push_str(&format!("- **Retry Of**: {}\n", parent));
    }
    md.push('\n');

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Total URLs**: {}\n", stats.total_urls));
    md.push_str(&format!("- **Successful**: {}\n", stats.successful_urls));
    md.push_str(&format!("- **Failed**: {}\n", stats.failed_urls));
    md.push_str(&format!("- **Success Rate**: {:.2}%\n", stats.success_rate));
    md.push_str(&format!(
        "- **Chunks Processed**: {}/{}\n",
        stats.chunks_processed, stats.total_chunks
    ));
    md.push_str(&format!("- **Attempts Recorded**: {}\n", stats.total_retries));
    if let Some(avg) = stats.average_processing_time_ms {
        md.push_str(&format!("- **Average Processing Time**: {:.0} ms\n", avg));
    }
    md.push('\n');

    // Status breakdown
    md.push_str("## URL Status Breakdown\n\n");
    md.push_str("| Status | Count |\n");
    md.push_str("|--------|-------|\n");
    for (status, count) in &stats.status_counts {
        md.push_str(&format!("| {} | {} |\n", status, count));
    }
    md.push('\n');

    if !stats.error_breakdown.is_empty() {
        md.push_str("## Error Breakdown\n\n");
        md.push_str("| Error Type | Count |\n");
        md.push_str("|------------|-------|\n");
        for (error_type, count) in &stats.error_breakdown {
            md.push_str(&format!("| {} | {} |\n", error_type, count));
        }
        md.push('\n');
    }

    if stats.chunks.len() > 1 {
        md.push_str("## Chunks\n\n");
        md.push_str("| Chunk | URLs | Succeeded | Failed | Pending |\n");
        md.push_str("|-------|------|-----------|--------|---------|\n");
        for chunk in &stats.chunks {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                chunk.chunk_number, chunk.total, chunk.succeeded, chunk.failed, chunk.pending
            ));
        }
        md.push('\n');
    }

    if !report.failed.is_empty() {
        md.push_str("## Failed URLs\n\n");
        md.push_str("| URL | Attempts | HTTP | Error |\n");
        md.push_str("|-----|----------|------|-------|\n");
        for failed in report.failed.iter().take(MAX_FAILED_ROWS) {
            let http = failed
                .http_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            let error = match (&failed.error_type, &failed.error_message) {
                (Some(kind), Some(message)) => format!("{}: {}", kind, message.replace('|', "\\|")),
                (Some(kind), None) => kind.clone(),
                (None, Some(message)) => message.replace('|', "\\|"),
                (None, None) => "-".to_string(),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                failed.url, failed.attempts, http, error
            ));
        }
        if report.failed.len() > MAX_FAILED_ROWS {
            md.push_str(&format!(
                "\n... and {} more\n",
                report.failed.len() - MAX_FAILED_ROWS
            ));
        }
        md.push('\n');
    }

    md
}
