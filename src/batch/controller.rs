//! Session controller
//!
//! The `Harvester` is the public entry point of the orchestrator. It owns the
//! store handle, the page fetcher and the registry of sessions running in
//! this process, and exposes the session operations:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `start_batch` | Validates and plans the URLs, persists the session, starts its workers |
//! | `get_progress` | Reads the committed counters |
//! | `cancel` | `in_progress -> cancelled`, stops claiming new rows |
//! | `retry_failed` | Derives a new session from (or reopens) the retry-eligible failed rows |
//! | `get_details` | Session, statistics and optionally every URL row |
//! | `delete` | Stops workers and deletes the session with its rows |
//! | `resume` | Recovers interrupted rows and restarts workers |
//!
//! A session becomes `completed` once its workers drain and no row is
//! pending, processing or retrying. `failed` is reserved for sessions whose
//! workers could not start or were aborted by a store error; the rows such a
//! session left open are failed with it so its counters add up.

use crate::batch::backoff::Backoff;
use crate::batch::executor::TaskExecutor;
use crate::batch::now_ms;
use crate::batch::planner::plan_batch;
use crate::batch::pool::WorkerPool;
use crate::config::{BatchConfig, Config, RetryMode, MAX_CHUNK_SIZE};
use crate::fetch::{build_fetcher, PageFetcher};
use crate::output::stats::{load_statistics, SessionStatistics};
use crate::state::{ExtractionStatus, SessionStatus};
use crate::storage::{
    open_storage, ExtractionRecord, Metadata, NewExtraction, NewSession, RecoveryReport,
    SessionRecord, SharedStorage, StorageError,
};
use crate::{HarvestError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Request to start a batch
#[derive(Debug, Clone, Default)]
pub struct StartBatch {
    pub user_id: String,
    /// Human-readable name; a timestamped default is used when absent
    pub name: Option<String>,
    pub source_url: String,
    pub urls: Vec<String>,
    /// Defaults to `batch.default-chunk-size`
    pub chunk_size: Option<u32>,
    /// Defaults to `batch.default-max-retries`
    pub max_retries: Option<u32>,
}

/// Committed progress of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub session_id: String,
    pub status: SessionStatus,
    pub total_urls: u32,
    pub successful_urls: u32,
    pub failed_urls: u32,
    pub progress_percent: f64,
    /// Submitted URLs dropped as duplicates of another URL in the batch
    pub duplicates_skipped: u64,
}

/// Session, statistics and optionally its URL rows
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub session: SessionRecord,
    pub statistics: SessionStatistics,
    pub extractions: Option<Vec<ExtractionRecord>>,
}

struct RunningSession {
    cancel: CancellationToken,
    handle: JoinHandle<Result<SessionStatus>>,
}

/// A session taken out of the registry by `wait`
///
/// Puts the session back if dropped before its task finished.
struct Waiting<'a> {
    registry: &'a Mutex<HashMap<String, RunningSession>>,
    session_id: String,
    running: Option<RunningSession>,
}

impl Waiting<'_> {
    async fn join(&mut self) -> Result<SessionStatus> {
        let joined = match self.running.as_mut() {
            Some(running) => (&mut running.handle).await,
            None => return Err(HarvestError::Worker("session already joined".to_string())),
        };
        self.running = None;
        joined.map_err(|e| HarvestError::Worker(e.to_string()))?
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            if let Ok(mut registry) = self.registry.lock() {
                registry.insert(std::mem::take(&mut self.session_id), running);
            }
        }
    }
}

/// Everything a session's background task needs
#[derive(Clone)]
struct SessionRunner {
    storage: SharedStorage,
    fetcher: Arc<dyn PageFetcher>,
    config: BatchConfig,
    poll_interval: Option<Duration>,
}

/// Batch extraction orchestrator
pub struct Harvester {
    runner: SessionRunner,
    config_hash: Option<String>,
    running: Mutex<HashMap<String, RunningSession>>,
}

impl Harvester {
    /// Creates a harvester over an existing store and fetcher
    pub fn new(storage: SharedStorage, fetcher: Arc<dyn PageFetcher>, config: BatchConfig) -> Self {
        Self {
            runner: SessionRunner {
                storage,
                fetcher,
                config,
                poll_interval: None,
            },
            config_hash: None,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the configured database and builds the configured fetcher
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = open_storage(Path::new(&config.output.database_path))?;
        let fetcher = build_fetcher(config)?;
        Ok(Self::new(
            SharedStorage::new(storage),
            fetcher,
            config.batch.clone(),
        ))
    }

    /// Overrides how often idle workers re-check the store
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.runner.poll_interval = Some(poll_interval);
        self
    }

    /// Records `hash` in the metadata of every session this harvester creates
    pub fn with_config_hash(mut self, hash: String) -> Self {
        self.config_hash = Some(hash);
        self
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.runner.storage
    }

    // ===== Session Operations =====

    /// Validates, plans and persists a batch, then starts its workers
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new session's id
    /// * `Err(HarvestError::Validation)` - The request was rejected; nothing was written
    pub fn start_batch(&self, request: StartBatch) -> Result<String> {
        let config = &self.runner.config;

        if request.user_id.trim().is_empty() {
            return Err(HarvestError::Validation("user id is required".to_string()));
        }
        if request.urls.is_empty() {
            return Err(HarvestError::Validation(
                "at least one URL is required".to_string(),
            ));
        }
        if request.urls.len() > config.max_urls_per_batch {
            return Err(HarvestError::Validation(format!(
                "batch has {} URLs, maximum is {}",
                request.urls.len(),
                config.max_urls_per_batch
            )));
        }

        let chunk_size = request.chunk_size.unwrap_or(config.default_chunk_size);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(HarvestError::Validation(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }
        let max_retries = request.max_retries.unwrap_or(config.default_max_retries);

        let plan = plan_batch(&request.urls, chunk_size, max_retries)?;
        if !plan.duplicates.is_empty() {
            tracing::warn!(
                "Dropped {} duplicate URL(s) from batch: {}",
                plan.duplicates.len(),
                plan.duplicates.join(", ")
            );
        }

        let session = NewSession::new(
            &request.user_id,
            request.name.as_deref(),
            &request.source_url,
            chunk_size,
            max_retries,
        )
        .with_metadata("submitted_urls", request.urls.len())
        .with_metadata("duplicates_skipped", plan.duplicates.len());
        let session = self.stamp(session);

        let record = self
            .runner
            .storage
            .with(|s| s.create_session(&session, &plan.extractions))?;

        tracing::info!(
            "Created session {} ({} URLs, chunk size {}, max retries {})",
            record.id,
            record.total_urls,
            chunk_size,
            max_retries
        );

        self.launch(&record.id)?;
        Ok(record.id)
    }

    /// Reads a session's committed progress
    pub fn get_progress(&self, session_id: &str) -> Result<Progress> {
        let session = self.load_session(session_id)?;
        Ok(Progress {
            session_id: session.id.clone(),
            status: session.status,
            total_urls: session.total_urls,
            successful_urls: session.successful_urls,
            failed_urls: session.failed_urls,
            progress_percent: session.progress_percent(),
            duplicates_skipped: session
                .metadata
                .get("duplicates_skipped")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }

    /// Cancels an in-progress session
    ///
    /// Pending rows stay pending and attempts already in flight are allowed
    /// to finish.
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self.load_session(session_id)?;
        require_status(&session, SessionStatus::InProgress)?;

        let cancelled = self.runner.storage.with(|s| {
            s.transition_session(session_id, SessionStatus::InProgress, SessionStatus::Cancelled)
        })?;

        if !cancelled {
            let current = self.load_session(session_id)?;
            return Err(HarvestError::InvalidSessionState {
                session_id: session_id.to_string(),
                status: current.status,
                expected: SessionStatus::InProgress,
            });
        }

        if let Some(running) = self.registry()?.get(session_id) {
            running.cancel.cancel();
        }

        tracing::info!("Cancelled session {}", session_id);
        Ok(())
    }

    /// Retries the retry-eligible failed extractions of a finished session
    ///
    /// Completed, cancelled and failed sessions qualify. Rows a failed
    /// session settled before they were ever attempted always qualify.
    ///
    /// With [`RetryMode::Derive`] a new session holding copies of the rows is
    /// created; with [`RetryMode::Reopen`] the rows are requeued in place and
    /// the original session returns to in_progress.
    ///
    /// # Returns
    ///
    /// The id of the session now processing the retries
    pub fn retry_failed(&self, session_id: &str) -> Result<String> {
        let session = self.load_session(session_id)?;
        if !matches!(
            session.status,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        ) {
            return Err(HarvestError::InvalidSessionState {
                session_id: session_id.to_string(),
                status: session.status,
                expected: SessionStatus::Completed,
            });
        }

        let candidates = self
            .runner
            .storage
            .with(|s| s.failed_retry_candidates(session_id))?;
        if candidates.is_empty() {
            return Err(HarvestError::Validation(format!(
                "session {} has no retry-eligible failed extractions",
                session_id
            )));
        }

        match self.runner.config.retry_mode {
            RetryMode::Derive => self.derive_retry_session(&session, &candidates),
            RetryMode::Reopen => {
                let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
                let moved = self
                    .runner
                    .storage
                    .with(|s| s.reopen_failed(session_id, &ids, now_ms()))?;

                tracing::info!(
                    "Reopened session {} with {} extraction(s) to retry",
                    session_id,
                    moved
                );
                self.launch(session_id)?;
                Ok(session_id.to_string())
            }
        }
    }

    /// Loads a session with its statistics and optionally its URL rows
    pub fn get_details(&self, session_id: &str, include_urls: bool) -> Result<SessionDetails> {
        let details = self.runner.storage.with(|s| {
            let session = s.get_session(session_id)?;
            let statistics = load_statistics(&*s, &session)?;
            let extractions = if include_urls {
                Some(s.list_extractions(session_id)?)
            } else {
                None
            };
            Ok(SessionDetails {
                session,
                statistics,
                extractions,
            })
        });

        details.map_err(|e| not_found_or(e, session_id))
    }

    /// Deletes a session and, by cascade, its extractions and attempt rows
    ///
    /// A session running in this process is stopped first.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.load_session(session_id)?;

        let running = self.registry()?.remove(session_id);
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!("Session {} task ended abnormally: {}", session_id, e);
            }
        }

        let deleted = self
            .runner
            .storage
            .with(|s| s.delete_session(session_id))?;
        if !deleted {
            return Err(HarvestError::SessionNotFound(session_id.to_string()));
        }

        tracing::info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Restarts an in-progress session left behind by a previous process
    ///
    /// Rows stuck in processing are settled first: they are requeued when
    /// they have retry budget left and failed otherwise.
    pub fn resume(&self, session_id: &str) -> Result<RecoveryReport> {
        let session = self.load_session(session_id)?;
        require_status(&session, SessionStatus::InProgress)?;

        if self.is_running(session_id)? {
            return Err(HarvestError::Validation(format!(
                "session {} is already running",
                session_id
            )));
        }

        let report = self
            .runner
            .storage
            .with(|s| s.recover_interrupted(session_id, now_ms()))?;

        if report.requeued + report.failed > 0 {
            tracing::info!(
                "Recovered session {}: {} requeued, {} failed",
                session_id,
                report.requeued,
                report.failed
            );
        }

        self.launch(session_id)?;
        Ok(report)
    }

    /// Resumes every in-progress session not running in this process
    pub fn resume_interrupted(&self) -> Result<Vec<String>> {
        let sessions = self
            .runner
            .storage
            .with(|s| s.list_sessions_by_status(SessionStatus::InProgress))?;

        let mut resumed = Vec::new();
        for session in sessions {
            if self.is_running(&session.id)? {
                continue;
            }
            self.resume(&session.id)?;
            resumed.push(session.id);
        }

        Ok(resumed)
    }

    /// Lists sessions, newest first
    pub fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionRecord>> {
        Ok(self.runner.storage.with(|s| s.list_sessions(user_id))?)
    }

    /// Waits for a session's workers to finish and returns its final status
    ///
    /// Returns the stored status right away when the session is not running
    /// in this process. Dropping the returned future leaves the session
    /// registered, so a later [`Harvester::shutdown`] still stops it.
    pub async fn wait(&self, session_id: &str) -> Result<SessionStatus> {
        let running = self.registry()?.remove(session_id);

        match running {
            Some(running) => {
                let mut waiting = Waiting {
                    registry: &self.running,
                    session_id: session_id.to_string(),
                    running: Some(running),
                };
                waiting.join().await
            }
            None => Ok(self.load_session(session_id)?.status),
        }
    }

    /// Stops every running session without changing its stored status
    ///
    /// Sessions stopped this way stay in_progress and can be resumed later.
    pub async fn shutdown(&self) {
        let running: Vec<(String, RunningSession)> = match self.running.lock() {
            Ok(mut registry) => registry.drain().collect(),
            Err(_) => return,
        };

        for (_, session) in &running {
            session.cancel.cancel();
        }

        for (session_id, session) in running {
            match session.handle.await {
                Ok(Ok(status)) => {
                    tracing::info!("Session {} stopped ({})", session_id, status)
                }
                Ok(Err(e)) => tracing::warn!("Session {} stopped with error: {}", session_id, e),
                Err(e) => tracing::warn!("Session {} task panicked: {}", session_id, e),
            }
        }
    }

    // ===== Internals =====

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RunningSession>>> {
        self.running
            .lock()
            .map_err(|_| HarvestError::Worker("session registry lock poisoned".to_string()))
    }

    fn stamp(&self, session: NewSession) -> NewSession {
        match &self.config_hash {
            Some(hash) => session.with_metadata("config_hash", hash.clone()),
            None => session,
        }
    }

    fn is_running(&self, session_id: &str) -> Result<bool> {
        Ok(self
            .registry()?
            .get(session_id)
            .is_some_and(|running| !running.handle.is_finished()))
    }

    fn load_session(&self, session_id: &str) -> Result<SessionRecord> {
        self.runner
            .storage
            .with(|s| s.get_session(session_id))
            .map_err(|e| not_found_or(e, session_id))
    }

    fn derive_retry_session(
        &self,
        parent: &SessionRecord,
        candidates: &[ExtractionRecord],
    ) -> Result<String> {
        let session = NewSession::new(
            &parent.user_id,
            Some(&format!("Retry of {}", parent.name)),
            &parent.source_url,
            parent.chunk_size,
            parent.max_retries,
        )
        .with_metadata("parent_session_id", parent.id.clone());
        let session = self.stamp(session);

        let extractions: Vec<NewExtraction> = candidates
            .iter()
            .map(|row| {
                let mut metadata = Metadata::new();
                metadata.insert("retry_of_extraction_id".to_string(), row.id.into());
                NewExtraction {
                    url: row.url.clone(),
                    url_hash: row.url_hash.clone(),
                    chunk_number: row.chunk_number,
                    position_in_chunk: row.position_in_chunk,
                    chunk_size: row.chunk_size,
                    max_retries: row.max_retries,
                    metadata,
                }
            })
            .collect();

        let record = self
            .runner
            .storage
            .with(|s| s.create_session(&session, &extractions))?;

        tracing::info!(
            "Derived retry session {} from {} with {} extraction(s)",
            record.id,
            parent.id,
            record.total_urls
        );

        self.launch(&record.id)?;
        Ok(record.id)
    }

    /// Starts the background task driving a session's workers
    fn launch(&self, session_id: &str) -> Result<()> {
        if self.is_running(session_id)? {
            return Err(HarvestError::Validation(format!(
                "session {} is already running",
                session_id
            )));
        }

        let cancel = CancellationToken::new();
        let runner = self.runner.clone();
        let id = session_id.to_string();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.drive(&id, &token).await });

        self.registry()?
            .insert(session_id.to_string(), RunningSession { cancel, handle });
        Ok(())
    }
}

impl SessionRunner {
    /// Runs a session's workers and settles its final status
    async fn drive(&self, session_id: &str, cancel: &CancellationToken) -> Result<SessionStatus> {
        if let Err(e) = self.fetcher.ready().await {
            tracing::error!(
                "Session {} could not start, {} fetcher unavailable: {}",
                session_id,
                self.fetcher.name(),
                e
            );
            self.mark_failed(session_id, &e.to_string())?;
            return Ok(SessionStatus::Failed);
        }

        let executor = TaskExecutor::new(
            self.storage.clone(),
            Arc::clone(&self.fetcher),
            Backoff::from_config(&self.config),
            self.config.attempt_timeout(),
        );
        let mut pool = WorkerPool::new(executor, self.storage.clone(), self.config.concurrency);
        if let Some(interval) = self.poll_interval {
            pool = pool.with_poll_interval(interval);
        }

        if let Err(e) = pool.run(session_id, cancel).await {
            self.mark_failed(session_id, &e.to_string())?;
            return Err(e);
        }

        if cancel.is_cancelled() {
            return Ok(self.storage.with(|s| s.get_session(session_id))?.status);
        }

        self.finalize(session_id)
    }

    /// Marks the session completed if no row is left to process
    fn finalize(&self, session_id: &str) -> Result<SessionStatus> {
        let session = self.storage.with(|s| {
            let counts = s.count_by_status(session_id)?;
            let outstanding = [
                ExtractionStatus::Pending,
                ExtractionStatus::Processing,
                ExtractionStatus::Retrying,
            ]
            .iter()
            .any(|state| counts.get(state).copied().unwrap_or(0) > 0);

            if !outstanding {
                s.transition_session(
                    session_id,
                    SessionStatus::InProgress,
                    SessionStatus::Completed,
                )?;
            }
            s.get_session(session_id)
        })?;

        if session.status == SessionStatus::Completed {
            tracing::info!(
                "Session {} completed: {} succeeded, {} failed of {}",
                session_id,
                session.successful_urls,
                session.failed_urls,
                session.total_urls
            );
        }

        Ok(session.status)
    }

    /// Fails the session and settles every row it left open
    fn mark_failed(&self, session_id: &str, reason: &str) -> Result<()> {
        let settled = self.storage.with(|s| s.fail_session(session_id, reason))?;
        if let Some(settled) = settled {
            tracing::warn!(
                "Session {} failed, {} unfinished extraction(s) marked failed",
                session_id,
                settled
            );
        }
        Ok(())
    }
}

fn require_status(session: &SessionRecord, expected: SessionStatus) -> Result<()> {
    if session.status == expected {
        Ok(())
    } else {
        Err(HarvestError::InvalidSessionState {
            session_id: session.id.clone(),
            status: session.status,
            expected,
        })
    }
}

fn not_found_or(error: StorageError, session_id: &str) -> HarvestError {
    match error {
        StorageError::SessionNotFound(_) => HarvestError::SessionNotFound(session_id.to_string()),
        other => HarvestError::Storage(other),
    }
}
