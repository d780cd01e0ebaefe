//! Single-attempt driver for one extraction
//!
//! # Attempt Flow
//!
//! 1. Claim the next row: it moves to processing, its attempt count is
//!    incremented and an audit row is opened (one store transaction)
//! 2. Call the page fetcher under the per-attempt timeout
//! 3. Classify the outcome
//! 4. Persist the outcome, the audit row and any counter increment
//!    (one store transaction)
//!
//! A retryable failure with budget left schedules the row for
//! `now + backoff(attempt)` instead of sleeping in the worker, so the worker
//! slot is free for other rows while the backoff runs.

use crate::batch::backoff::{Backoff, RETRY_STRATEGY};
use crate::batch::classifier::{classify, Classification};
use crate::batch::now_ms;
use crate::fetch::{FetchOutcome, PageFetcher};
use crate::state::ExtractionStatus;
use crate::storage::{AttemptResult, ClaimedAttempt, SharedStorage, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Runs attempts for the rows of one session
#[derive(Clone)]
pub struct TaskExecutor {
    storage: SharedStorage,
    fetcher: Arc<dyn PageFetcher>,
    backoff: Backoff,
    attempt_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        storage: SharedStorage,
        fetcher: Arc<dyn PageFetcher>,
        backoff: Backoff,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            fetcher,
            backoff,
            attempt_timeout,
        }
    }

    /// Claims the next claimable row of a session, if any
    pub fn claim_next(&self, session_id: &str) -> StorageResult<Option<ClaimedAttempt>> {
        self.storage
            .with(|s| s.claim_next_extraction(session_id, now_ms(), RETRY_STRATEGY))
    }

    /// Performs the claimed attempt and persists its outcome
    ///
    /// The fetch is bounded by the fetcher's [`PageFetcher::attempt_deadline`].
    /// `cancel` only cuts short waits inside the fetcher; the attempt itself
    /// always finishes and is recorded.
    ///
    /// # Returns
    ///
    /// * `Ok(ExtractionStatus)` - The row's status after the attempt
    /// * `Err(StorageError)` - The outcome could not be persisted
    pub async fn run(
        &self,
        claim: ClaimedAttempt,
        cancel: &CancellationToken,
    ) -> StorageResult<ExtractionStatus> {
        let extraction = &claim.extraction;
        tracing::debug!(
            "Attempt {} for {} (chunk {}, position {})",
            claim.attempt_number,
            extraction.url,
            extraction.chunk_number,
            extraction.position_in_chunk
        );

        let deadline = self.fetcher.attempt_deadline(self.attempt_timeout);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            deadline,
            self.fetcher.fetch_until(&extraction.url, cancel),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::timeout(format!(
                "Attempt exceeded {} ms",
                deadline.as_millis()
            )),
        };
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let result = self.resolve(&claim, &outcome, elapsed_ms);
        self.storage
            .with(|s| s.finish_attempt(extraction.id, claim.attempt_number, &result))?;

        match result.status {
            ExtractionStatus::Success => tracing::info!(
                "Extracted {} in {} ms ({} links)",
                extraction.url,
                elapsed_ms,
                result.links_found.unwrap_or(0)
            ),
            ExtractionStatus::Retrying => tracing::warn!(
                "Attempt {} for {} failed ({}), retry scheduled",
                claim.attempt_number,
                extraction.url,
                result.error_message.as_deref().unwrap_or("unknown error")
            ),
            _ => tracing::warn!(
                "Extraction of {} failed after {} attempt(s): {}",
                extraction.url,
                claim.attempt_number,
                result.error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        Ok(result.status)
    }

    /// Turns a classified outcome into the row update for this attempt
    fn resolve(
        &self,
        claim: &ClaimedAttempt,
        outcome: &FetchOutcome,
        elapsed_ms: i64,
    ) -> AttemptResult {
        let classification = classify(outcome);
        let has_budget = claim.attempt_number < claim.extraction.max_retries;

        let (status, next_attempt_at) = match classification {
            Classification::Success => (ExtractionStatus::Success, None),
            Classification::Retryable(_) if has_budget => (
                ExtractionStatus::Retrying,
                Some(now_ms().saturating_add(self.backoff.delay_ms(claim.attempt_number))),
            ),
            Classification::Retryable(_) | Classification::Terminal(_) => {
                (ExtractionStatus::Failed, None)
            }
        };

        let mut error_message = outcome.error_message();
        if classification.is_retryable() && !has_budget {
            error_message = error_message.map(|m| {
                format!(
                    "{} (retries exhausted after {} attempts)",
                    m, claim.attempt_number
                )
            });
        }

        let page = match outcome {
            FetchOutcome::Page(page) if status == ExtractionStatus::Success => Some(page),
            _ => None,
        };

        AttemptResult {
            status,
            http_status: outcome.http_status(),
            processing_time_ms: elapsed_ms,
            bytes_found: page.map(|p| p.bytes as i64),
            links_found: page.map(|p| p.links_found as i64),
            final_url: page.map(|p| p.final_url.clone()),
            error_type: classification
                .error_type()
                .map(|kind| kind.to_db_string().to_string()),
            error_message,
            next_attempt_at,
        }
    }
}
