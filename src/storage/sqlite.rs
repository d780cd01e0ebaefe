//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{ErrorType, ExtractionStatus, SessionStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    AttemptResult, ChunkProgress, ClaimedAttempt, ExtractionRecord, Metadata, NewExtraction,
    NewSession, RecoveryReport, RetryRecord, SessionRecord,
};
use crate::HarvestError;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const SESSION_COLUMNS: &str = "id, user_id, name, source_url, total_urls, successful_urls,
    failed_urls, chunk_size, max_retries, status, started_at, completed_at, metadata";

const EXTRACTION_COLUMNS: &str = "id, session_id, url, url_hash, chunk_number,
    position_in_chunk, chunk_size, status, attempt_count, max_retries, http_status,
    processing_time_ms, bytes_found, links_found, final_url, error_type, error_message,
    last_error_at, next_attempt_at, metadata, created_at, updated_at";

const RETRY_COLUMNS: &str = "id, extraction_id, attempt_number, status, error_type,
    error_message, processing_time_ms, http_status, retry_strategy, created_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        // Another process (a second `cancel` invocation) may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_metadata(idx: usize, raw: &str) -> rusqlite::Result<Metadata> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn extraction_status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<ExtractionStatus> {
    let raw: String = row.get(idx)?;
    ExtractionStatus::from_db_string(&raw)
        .ok_or_else(|| conversion_error(idx, format!("unknown extraction status: {}", raw)))
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(9)?;
    let metadata: String = row.get(12)?;

    Ok(SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        source_url: row.get(3)?,
        total_urls: row.get(4)?,
        successful_urls: row.get(5)?,
        failed_urls: row.get(6)?,
        chunk_size: row.get(7)?,
        max_retries: row.get(8)?,
        status: SessionStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(9, format!("unknown session status: {}", status)))?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        metadata: parse_metadata(12, &metadata)?,
    })
}

fn map_extraction(row: &Row<'_>) -> rusqlite::Result<ExtractionRecord> {
    let metadata: String = row.get(19)?;

    Ok(ExtractionRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        url: row.get(2)?,
        url_hash: row.get(3)?,
        chunk_number: row.get(4)?,
        position_in_chunk: row.get(5)?,
        chunk_size: row.get(6)?,
        status: extraction_status_at(row, 7)?,
        attempt_count: row.get(8)?,
        max_retries: row.get(9)?,
        http_status: row.get(10)?,
        processing_time_ms: row.get(11)?,
        bytes_found: row.get(12)?,
        links_found: row.get(13)?,
        final_url: row.get(14)?,
        error_type: row.get(15)?,
        error_message: row.get(16)?,
        last_error_at: row.get(17)?,
        next_attempt_at: row.get(18)?,
        metadata: parse_metadata(19, &metadata)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

fn map_retry(row: &Row<'_>) -> rusqlite::Result<RetryRecord> {
    Ok(RetryRecord {
        id: row.get(0)?,
        extraction_id: row.get(1)?,
        attempt_number: row.get(2)?,
        status: extraction_status_at(row, 3)?,
        error_type: row.get(4)?,
        error_message: row.get(5)?,
        processing_time_ms: row.get(6)?,
        http_status: row.get(7)?,
        retry_strategy: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn query_session(conn: &Connection, session_id: &str) -> StorageResult<SessionRecord> {
    conn.query_row(
        &format!("SELECT {} FROM extraction_sessions WHERE id = ?1", SESSION_COLUMNS),
        params![session_id],
        map_session,
    )
    .optional()?
    .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))
}

fn query_extraction(conn: &Connection, extraction_id: i64) -> StorageResult<ExtractionRecord> {
    conn.query_row(
        &format!("SELECT {} FROM url_extractions WHERE id = ?1", EXTRACTION_COLUMNS),
        params![extraction_id],
        map_extraction,
    )
    .optional()?
    .ok_or(StorageError::ExtractionNotFound(extraction_id))
}

impl Storage for SqliteStorage {
    // ===== Session Management =====

    fn create_session(
        &mut self,
        session: &NewSession,
        extractions: &[NewExtraction],
    ) -> StorageResult<SessionRecord> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO extraction_sessions (id, user_id, name, source_url, total_urls,
             chunk_size, max_retries, status, started_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.user_id,
                session.name,
                session.source_url,
                extractions.len() as i64,
                session.chunk_size,
                session.max_retries,
                SessionStatus::InProgress.to_db_string(),
                now,
                serde_json::to_string(&session.metadata)?,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO url_extractions (session_id, url, url_hash, chunk_number,
                 position_in_chunk, chunk_size, status, max_retries, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            )?;

            for extraction in extractions {
                stmt.execute(params![
                    session.id,
                    extraction.url,
                    extraction.url_hash,
                    extraction.chunk_number,
                    extraction.position_in_chunk,
                    extraction.chunk_size,
                    ExtractionStatus::Pending.to_db_string(),
                    extraction.max_retries,
                    serde_json::to_string(&extraction.metadata)?,
                    now,
                ])?;
            }
        }

        let record = query_session(&tx, &session.id)?;
        tx.commit()?;
        Ok(record)
    }

    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        query_session(&self.conn, session_id)
    }

    fn list_sessions(&self, user_id: Option<&str>) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM extraction_sessions
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY started_at DESC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![user_id], map_session)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM extraction_sessions WHERE status = ?1 ORDER BY started_at",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![status.to_db_string()], map_session)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    fn transition_session(
        &mut self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> StorageResult<bool> {
        let completed_at = if to.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };

        let changed = self.conn.execute(
            "UPDATE extraction_sessions SET status = ?1, completed_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                to.to_db_string(),
                completed_at,
                session_id,
                from.to_db_string()
            ],
        )?;

        Ok(changed > 0)
    }

    fn set_session_metadata(
        &mut self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut session = query_session(&tx, session_id)?;
        session.metadata.insert(key.to_string(), value);

        tx.execute(
            "UPDATE extraction_sessions SET metadata = ?1 WHERE id = ?2",
            params![serde_json::to_string(&session.metadata)?, session_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_session(&mut self, session_id: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM extraction_sessions WHERE id = ?1",
            params![session_id],
        )?;
        Ok(changed > 0)
    }

    // ===== Attempt Lifecycle =====

    fn claim_next_extraction(
        &mut self,
        session_id: &str,
        now_ms: i64,
        retry_strategy: &str,
    ) -> StorageResult<Option<ClaimedAttempt>> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT e.id FROM url_extractions e
                 JOIN extraction_sessions s ON s.id = e.session_id
                 WHERE e.session_id = ?1
                   AND s.status = ?2
                   AND (e.status = ?3
                        OR (e.status = ?4 AND COALESCE(e.next_attempt_at, 0) <= ?5))
                 ORDER BY e.chunk_number, e.position_in_chunk
                 LIMIT 1",
                params![
                    session_id,
                    SessionStatus::InProgress.to_db_string(),
                    ExtractionStatus::Pending.to_db_string(),
                    ExtractionStatus::Retrying.to_db_string(),
                    now_ms
                ],
                |row| row.get(0),
            )
            .optional()?;

        let Some(extraction_id) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE url_extractions
             SET status = ?1, attempt_count = attempt_count + 1, next_attempt_at = NULL, updated_at = ?2
             WHERE id = ?3",
            params![
                ExtractionStatus::Processing.to_db_string(),
                now,
                extraction_id
            ],
        )?;

        let extraction = query_extraction(&tx, extraction_id)?;
        let attempt_number = extraction.attempt_count;

        tx.execute(
            "INSERT INTO extraction_retries (extraction_id, attempt_number, status, retry_strategy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                extraction_id,
                attempt_number,
                ExtractionStatus::Processing.to_db_string(),
                retry_strategy,
                now
            ],
        )?;

        tx.commit()?;

        Ok(Some(ClaimedAttempt {
            extraction,
            attempt_number,
        }))
    }

    fn finish_attempt(
        &mut self,
        extraction_id: i64,
        attempt_number: u32,
        result: &AttemptResult,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = query_extraction(&tx, extraction_id)?;
        if current.status != ExtractionStatus::Processing
            || current.attempt_count != attempt_number
            || !current.status.can_transition_to(result.status)
        {
            return Err(StorageError::InvalidTransition {
                id: extraction_id,
                from: current.status,
                to: result.status,
            });
        }

        let error_at = result.error_type.as_ref().map(|_| now.clone());

        tx.execute(
            "UPDATE url_extractions SET
                status = ?1, http_status = ?2, processing_time_ms = ?3, bytes_found = ?4,
                links_found = ?5, final_url = ?6, error_type = ?7, error_message = ?8,
                last_error_at = COALESCE(?9, last_error_at), next_attempt_at = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                result.status.to_db_string(),
                result.http_status,
                result.processing_time_ms,
                result.bytes_found,
                result.links_found,
                result.final_url,
                result.error_type,
                result.error_message,
                error_at,
                result.next_attempt_at,
                now,
                extraction_id
            ],
        )?;

        let audited = tx.execute(
            "UPDATE extraction_retries SET
                status = ?1, error_type = ?2, error_message = ?3, processing_time_ms = ?4, http_status = ?5
             WHERE extraction_id = ?6 AND attempt_number = ?7",
            params![
                result.status.to_db_string(),
                result.error_type,
                result.error_message,
                result.processing_time_ms,
                result.http_status,
                extraction_id,
                attempt_number
            ],
        )?;

        if audited != 1 {
            return Err(StorageError::ConstraintViolation(format!(
                "No audit row for attempt {} of extraction {}",
                attempt_number, extraction_id
            )));
        }

        let counter = match result.status {
            ExtractionStatus::Success => Some("successful_urls"),
            ExtractionStatus::Failed => Some("failed_urls"),
            _ => None,
        };

        if let Some(column) = counter {
            tx.execute(
                &format!(
                    "UPDATE extraction_sessions SET {0} = {0} + 1 WHERE id = ?1",
                    column
                ),
                params![current.session_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn recover_interrupted(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> StorageResult<RecoveryReport> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let interrupted: Vec<(i64, u32, u32)> = {
            let mut stmt = tx.prepare(
                "SELECT id, attempt_count, max_retries FROM url_extractions
                 WHERE session_id = ?1 AND status = ?2",
            )?;
            let rows = stmt
                .query_map(
                    params![session_id, ExtractionStatus::Processing.to_db_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let error_type = ErrorType::Interrupted.to_db_string();
        let message = "Attempt interrupted before completion";
        let mut report = RecoveryReport::default();

        for (extraction_id, attempt_count, max_retries) in interrupted {
            let (status, next_attempt_at) = if attempt_count < max_retries {
                report.requeued += 1;
                (ExtractionStatus::Retrying, Some(now_ms))
            } else {
                report.failed += 1;
                (ExtractionStatus::Failed, None)
            };

            tx.execute(
                "UPDATE extraction_retries SET status = ?1, error_type = ?2, error_message = ?3
                 WHERE extraction_id = ?4 AND attempt_number = ?5",
                params![
                    status.to_db_string(),
                    error_type,
                    message,
                    extraction_id,
                    attempt_count
                ],
            )?;

            tx.execute(
                "UPDATE url_extractions SET status = ?1, error_type = ?2, error_message = ?3,
                 last_error_at = ?4, next_attempt_at = ?5, updated_at = ?4
                 WHERE id = ?6",
                params![
                    status.to_db_string(),
                    error_type,
                    message,
                    now,
                    next_attempt_at,
                    extraction_id
                ],
            )?;

            if status == ExtractionStatus::Failed {
                tx.execute(
                    "UPDATE extraction_sessions SET failed_urls = failed_urls + 1 WHERE id = ?1",
                    params![session_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn fail_session(&mut self, session_id: &str, reason: &str) -> StorageResult<Option<u64>> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let failed = tx.execute(
            "UPDATE extraction_sessions SET status = ?1, completed_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                SessionStatus::Failed.to_db_string(),
                now,
                session_id,
                SessionStatus::InProgress.to_db_string()
            ],
        )?;

        if failed == 0 {
            // Existence check; an unknown session surfaces as SessionNotFound
            query_session(&tx, session_id)?;
            return Ok(None);
        }

        let error_type = ErrorType::Aborted.to_db_string();
        let message = format!("Session failed: {}", reason);

        tx.execute(
            "UPDATE extraction_retries SET status = ?1, error_type = ?2, error_message = ?3
             WHERE extraction_id IN (
                 SELECT id FROM url_extractions WHERE session_id = ?4 AND status = ?5
             )
             AND attempt_number = (
                 SELECT attempt_count FROM url_extractions WHERE id = extraction_retries.extraction_id
             )",
            params![
                ExtractionStatus::Failed.to_db_string(),
                error_type,
                message,
                session_id,
                ExtractionStatus::Processing.to_db_string()
            ],
        )?;

        let settled = tx.execute(
            "UPDATE url_extractions SET status = ?1, error_type = ?2, error_message = ?3,
             last_error_at = ?4, next_attempt_at = NULL, updated_at = ?4
             WHERE session_id = ?5 AND status IN (?6, ?7, ?8)",
            params![
                ExtractionStatus::Failed.to_db_string(),
                error_type,
                message,
                now,
                session_id,
                ExtractionStatus::Pending.to_db_string(),
                ExtractionStatus::Processing.to_db_string(),
                ExtractionStatus::Retrying.to_db_string()
            ],
        )? as u64;

        tx.execute(
            "UPDATE extraction_sessions SET failed_urls = failed_urls + ?1 WHERE id = ?2",
            params![settled as i64, session_id],
        )?;

        let mut session = query_session(&tx, session_id)?;
        session
            .metadata
            .insert("failure_reason".to_string(), reason.into());
        tx.execute(
            "UPDATE extraction_sessions SET metadata = ?1 WHERE id = ?2",
            params![serde_json::to_string(&session.metadata)?, session_id],
        )?;

        tx.commit()?;
        Ok(Some(settled))
    }

    fn earliest_next_attempt(&self, session_id: &str) -> StorageResult<Option<i64>> {
        let earliest: Option<i64> = self.conn.query_row(
            "SELECT MIN(next_attempt_at) FROM url_extractions WHERE session_id = ?1 AND status = ?2",
            params![session_id, ExtractionStatus::Retrying.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(earliest)
    }

    // ===== Extraction Queries =====

    fn get_extraction(&self, extraction_id: i64) -> StorageResult<ExtractionRecord> {
        query_extraction(&self.conn, extraction_id)
    }

    fn find_extraction_by_hash(
        &self,
        session_id: &str,
        url_hash: &str,
    ) -> StorageResult<Option<ExtractionRecord>> {
        let extraction = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM url_extractions WHERE session_id = ?1 AND url_hash = ?2",
                    EXTRACTION_COLUMNS
                ),
                params![session_id, url_hash],
                map_extraction,
            )
            .optional()?;
        Ok(extraction)
    }

    fn list_extractions(&self, session_id: &str) -> StorageResult<Vec<ExtractionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM url_extractions WHERE session_id = ?1
             ORDER BY chunk_number, position_in_chunk",
            EXTRACTION_COLUMNS
        ))?;

        let extractions = stmt
            .query_map(params![session_id], map_extraction)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(extractions)
    }

    fn list_retries(&self, extraction_id: i64) -> StorageResult<Vec<RetryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM extraction_retries WHERE extraction_id = ?1 ORDER BY attempt_number",
            RETRY_COLUMNS
        ))?;

        let retries = stmt
            .query_map(params![extraction_id], map_retry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(retries)
    }

    fn failed_retry_candidates(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ExtractionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM url_extractions
             WHERE session_id = ?1 AND status = ?2 AND attempt_count < MAX(max_retries, 1)
             ORDER BY chunk_number, position_in_chunk",
            EXTRACTION_COLUMNS
        ))?;

        let extractions = stmt
            .query_map(
                params![session_id, ExtractionStatus::Failed.to_db_string()],
                map_extraction,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(extractions)
    }

    fn reopen_failed(
        &mut self,
        session_id: &str,
        extraction_ids: &[i64],
        now_ms: i64,
    ) -> StorageResult<u64> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let reopened = tx.execute(
            "UPDATE extraction_sessions SET status = ?1, completed_at = NULL
             WHERE id = ?2 AND status IN (?3, ?4, ?5)",
            params![
                SessionStatus::InProgress.to_db_string(),
                session_id,
                SessionStatus::Completed.to_db_string(),
                SessionStatus::Cancelled.to_db_string(),
                SessionStatus::Failed.to_db_string()
            ],
        )?;

        if reopened == 0 {
            let session = query_session(&tx, session_id)?;
            return Err(StorageError::ConstraintViolation(format!(
                "Session {} cannot be reopened from status {}",
                session_id, session.status
            )));
        }

        let mut moved: u64 = 0;
        for extraction_id in extraction_ids {
            moved += tx.execute(
                "UPDATE url_extractions SET status = ?1, next_attempt_at = ?2, updated_at = ?3
                 WHERE id = ?4 AND session_id = ?5 AND status = ?6 AND attempt_count < MAX(max_retries, 1)",
                params![
                    ExtractionStatus::Retrying.to_db_string(),
                    now_ms,
                    now,
                    extraction_id,
                    session_id,
                    ExtractionStatus::Failed.to_db_string()
                ],
            )? as u64;
        }

        tx.execute(
            "UPDATE extraction_sessions SET failed_urls = failed_urls - ?1 WHERE id = ?2",
            params![moved as i64, session_id],
        )?;

        tx.commit()?;
        Ok(moved)
    }

    // ===== Statistics =====

    fn count_by_status(
        &self,
        session_id: &str,
    ) -> StorageResult<HashMap<ExtractionStatus, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM url_extractions WHERE session_id = ?1 GROUP BY status",
        )?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((extraction_status_at(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }

    fn count_chunks_processed(&self, session_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT chunk_number) FROM url_extractions
             WHERE session_id = ?1 AND status != ?2",
            params![session_id, ExtractionStatus::Pending.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_session_retries(&self, session_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM extraction_retries r
             JOIN url_extractions e ON e.id = r.extraction_id
             WHERE e.session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn average_processing_time(&self, session_id: &str) -> StorageResult<Option<f64>> {
        let average: Option<f64> = self.conn.query_row(
            "SELECT AVG(processing_time_ms) FROM url_extractions
             WHERE session_id = ?1 AND processing_time_ms IS NOT NULL",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(average)
    }

    fn error_breakdown(&self, session_id: &str) -> StorageResult<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(error_type, ?3), COUNT(*) FROM url_extractions
             WHERE session_id = ?1 AND status = ?2
             GROUP BY 1",
        )?;

        let mut breakdown = HashMap::new();
        let rows = stmt.query_map(
            params![
                session_id,
                ExtractionStatus::Failed.to_db_string(),
                ErrorType::Unknown.to_db_string()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        for row in rows {
            let (error_type, count) = row?;
            breakdown.insert(error_type, count as u64);
        }

        Ok(breakdown)
    }

    fn chunk_breakdown(&self, session_id: &str) -> StorageResult<Vec<ChunkProgress>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_number,
                    COUNT(*),
                    SUM(CASE WHEN status = ?2 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = ?3 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = ?4 THEN 1 ELSE 0 END)
             FROM url_extractions
             WHERE session_id = ?1
             GROUP BY chunk_number
             ORDER BY chunk_number",
        )?;

        let chunks = stmt
            .query_map(
                params![
                    session_id,
                    ExtractionStatus::Success.to_db_string(),
                    ExtractionStatus::Failed.to_db_string(),
                    ExtractionStatus::Pending.to_db_string()
                ],
                |row| {
                    Ok(ChunkProgress {
                        chunk_number: row.get(0)?,
                        total: row.get::<_, i64>(1)? as u64,
                        succeeded: row.get::<_, i64>(2)? as u64,
                        failed: row.get::<_, i64>(3)? as u64,
                        pending: row.get::<_, i64>(4)? as u64,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(chunks)
    }
}
