//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Batch-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One batch extraction request
CREATE TABLE IF NOT EXISTS extraction_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    source_url TEXT NOT NULL,
    total_urls INTEGER NOT NULL CHECK (total_urls >= 0),
    successful_urls INTEGER NOT NULL DEFAULT 0 CHECK (successful_urls >= 0),
    failed_urls INTEGER NOT NULL DEFAULT 0 CHECK (failed_urls >= 0),
    chunk_size INTEGER NOT NULL CHECK (chunk_size > 0),
    max_retries INTEGER NOT NULL CHECK (max_retries >= 0),
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    CHECK (successful_urls + failed_urls <= total_urls)
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON extraction_sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON extraction_sessions(status);

-- One URL within a session
CREATE TABLE IF NOT EXISTS url_extractions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES extraction_sessions(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    chunk_number INTEGER NOT NULL CHECK (chunk_number > 0),
    position_in_chunk INTEGER NOT NULL CHECK (position_in_chunk >= 0),
    chunk_size INTEGER NOT NULL CHECK (chunk_size > 0),
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
    max_retries INTEGER NOT NULL CHECK (max_retries >= 0),
    http_status INTEGER,
    processing_time_ms INTEGER,
    bytes_found INTEGER,
    links_found INTEGER,
    final_url TEXT,
    error_type TEXT,
    error_message TEXT,
    last_error_at TEXT,
    next_attempt_at INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (position_in_chunk < chunk_size),
    UNIQUE(session_id, chunk_number, position_in_chunk)
);

CREATE INDEX IF NOT EXISTS idx_extractions_session_status ON url_extractions(session_id, status);
CREATE INDEX IF NOT EXISTS idx_extractions_session_hash ON url_extractions(session_id, url_hash);
CREATE INDEX IF NOT EXISTS idx_extractions_order ON url_extractions(session_id, chunk_number, position_in_chunk);

-- Audit row for every attempt of an extraction
CREATE TABLE IF NOT EXISTS extraction_retries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    extraction_id INTEGER NOT NULL REFERENCES url_extractions(id) ON DELETE CASCADE,
    attempt_number INTEGER NOT NULL CHECK (attempt_number > 0),
    status TEXT NOT NULL,
    error_type TEXT,
    error_message TEXT,
    processing_time_ms INTEGER,
    http_status INTEGER,
    retry_strategy TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(extraction_id, attempt_number)
);

CREATE INDEX IF NOT EXISTS idx_retries_extraction ON extraction_retries(extraction_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Gets the current schema version
///
/// This can be used for future migrations if the schema changes.
pub fn get_schema_version() -> u32 {
    1
}
