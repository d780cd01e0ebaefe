//! Bounded worker pool for one session
//!
//! The pool starts `concurrency` long-lived workers. Each worker loops:
//!
//! 1. Stop if the session's cancellation token fired
//! 2. Claim the next pending or due retrying row and run one attempt
//! 3. When nothing is claimable, stop if no row is pending, processing or
//!    retrying (or the session left in_progress); otherwise wait for another
//!    worker to finish an attempt, the earliest scheduled retry to become
//!    due, or cancellation
//!
//! Since every worker runs at most one attempt at a time, a session never
//! has more than `concurrency` rows in processing.

use crate::batch::executor::TaskExecutor;
use crate::batch::now_ms;
use crate::state::{ExtractionStatus, SessionStatus};
use crate::storage::{SharedStorage, StorageError};
use crate::HarvestError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Longest a waiting worker sleeps before looking at the store again
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Drives a session's rows to completion with a fixed number of workers
pub struct WorkerPool {
    executor: TaskExecutor,
    storage: SharedStorage,
    concurrency: usize,
    poll_interval: Duration,
}

struct WorkerShared {
    executor: TaskExecutor,
    storage: SharedStorage,
    session_id: String,
    stop: CancellationToken,
    progress: Notify,
    poll_interval: Duration,
}

/// What a worker found when nothing was claimable
enum Idle {
    Finished,
    WaitFor(Duration),
}

impl WorkerPool {
    pub fn new(executor: TaskExecutor, storage: SharedStorage, concurrency: u32) -> Self {
        Self {
            executor,
            storage,
            concurrency: concurrency.max(1) as usize,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs workers until the session has no claimable work left or `cancel` fires
    ///
    /// In-flight attempts always run to completion; cancellation only stops
    /// workers from claiming more rows. A store error stops every worker and
    /// is returned.
    pub async fn run(&self, session_id: &str, cancel: &CancellationToken) -> Result<(), HarvestError> {
        let shared = Arc::new(WorkerShared {
            executor: self.executor.clone(),
            storage: self.storage.clone(),
            session_id: session_id.to_string(),
            stop: cancel.child_token(),
            progress: Notify::new(),
            poll_interval: self.poll_interval,
        });

        tracing::info!(
            "Starting {} workers for session {}",
            self.concurrency,
            session_id
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let shared = Arc::clone(&shared);
            workers.spawn(async move { worker_loop(shared, worker_id).await });
        }

        let mut failure: Option<HarvestError> = None;
        while let Some(joined) = workers.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => HarvestError::Storage(e),
                Err(e) => HarvestError::Worker(e.to_string()),
            };

            tracing::error!("Worker for session {} stopped: {}", session_id, error);
            shared.stop.cancel();
            failure.get_or_insert(error);
        }

        match failure {
            Some(error) => Err(error),
            None => {
                tracing::debug!("All workers for session {} exited", session_id);
                Ok(())
            }
        }
    }
}

async fn worker_loop(shared: Arc<WorkerShared>, worker_id: usize) -> Result<(), StorageError> {
    loop {
        if shared.stop.is_cancelled() {
            tracing::debug!("Worker {} observed cancellation", worker_id);
            return Ok(());
        }

        // Registered before the claim so a completion between the claim and
        // the wait below is not missed
        let progress = shared.progress.notified();
        tokio::pin!(progress);
        progress.as_mut().enable();

        if let Some(claim) = shared.executor.claim_next(&shared.session_id)? {
            let outcome = shared.executor.run(claim, &shared.stop).await;
            shared.progress.notify_waiters();
            outcome?;
            continue;
        }

        let wait = match idle_state(&shared)? {
            Idle::Finished => {
                shared.progress.notify_waiters();
                return Ok(());
            }
            Idle::WaitFor(wait) => wait,
        };

        tokio::select! {
            _ = shared.stop.cancelled() => return Ok(()),
            _ = progress.as_mut() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Decides whether an idle worker should exit or how long it should wait
fn idle_state(shared: &WorkerShared) -> Result<Idle, StorageError> {
    let session_id = shared.session_id.as_str();
    let (status, counts, earliest) = shared.storage.with(|s| {
        Ok((
            s.get_session(session_id)?.status,
            s.count_by_status(session_id)?,
            s.earliest_next_attempt(session_id)?,
        ))
    })?;

    if status != SessionStatus::InProgress {
        return Ok(Idle::Finished);
    }

    let outstanding: u64 = [
        ExtractionStatus::Pending,
        ExtractionStatus::Processing,
        ExtractionStatus::Retrying,
    ]
    .iter()
    .map(|state| counts.get(state).copied().unwrap_or(0))
    .sum();

    if outstanding == 0 {
        return Ok(Idle::Finished);
    }

    let wait = match earliest {
        Some(due) => Duration::from_millis(due.saturating_sub(now_ms()).max(0) as u64),
        None => shared.poll_interval,
    };

    Ok(Idle::WaitFor(wait.min(shared.poll_interval)))
}
