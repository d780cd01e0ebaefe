//! Retry-failed modes, crash recovery and resume

use crate::common::*;
use batch_harvest::batch::{plan_batch, RETRY_STRATEGY};
use batch_harvest::config::RetryMode;
use batch_harvest::storage::{NewSession, SharedStorage, SqliteStorage, Storage};
use batch_harvest::{ExtractionStatus, HarvestError, Harvester, SessionStatus, StartBatch};
use std::sync::Arc;
use std::time::Duration;

fn batch(urls: Vec<String>, max_retries: u32) -> StartBatch {
    StartBatch {
        user_id: "user-1".to_string(),
        name: Some("Recovery".to_string()),
        source_url: "https://example.com".to_string(),
        urls,
        chunk_size: Some(2),
        max_retries: Some(max_retries),
    }
}

/// Persists a session directly and leaves one attempt in processing,
/// as if the process died mid-fetch
fn interrupted_session(storage: &mut dyn Storage, max_retries: u32) -> String {
    let plan = plan_batch(&urls(3), 2, max_retries).unwrap();
    let session = NewSession::new("user-1", None, "https://example.com", 2, max_retries);
    let record = storage.create_session(&session, &plan.extractions).unwrap();

    let claim = storage
        .claim_next_extraction(&record.id, 0, RETRY_STRATEGY)
        .unwrap()
        .unwrap();
    assert_eq!(claim.extraction.status, ExtractionStatus::Processing);

    record.id
}

#[tokio::test]
async fn test_retry_failed_derives_new_session() {
    let target = "https://example.com/page-1";
    let fetcher = Arc::new(ScriptedFetcher::new().script(target, vec![rejected(404)]));
    let harvester = harvester_with_mode(fetcher.clone(), RetryMode::Derive);

    let original = harvester.start_batch(batch(urls(3), 3)).unwrap();
    assert_eq!(
        harvester.wait(&original).await.unwrap(),
        SessionStatus::Completed
    );
    assert_eq!(harvester.get_progress(&original).unwrap().failed_urls, 1);

    let derived = harvester.retry_failed(&original).unwrap();
    assert_ne!(derived, original);
    assert_eq!(harvester.wait(&derived).await.unwrap(), SessionStatus::Completed);

    let details = harvester.get_details(&derived, true).unwrap();
    assert_eq!(details.session.total_urls, 1);
    assert_eq!(details.session.successful_urls, 1);
    assert_eq!(details.session.metadata["parent_session_id"], original.as_str());

    let rows = details.extractions.unwrap();
    assert_eq!(rows[0].url, target);
    assert_eq!((rows[0].chunk_number, rows[0].position_in_chunk), (1, 1));
    assert_eq!(rows[0].attempt_count, 1);

    // The original session is left as it was
    let progress = harvester.get_progress(&original).unwrap();
    assert_eq!(progress.status, SessionStatus::Completed);
    assert_eq!(progress.failed_urls, 1);
    assert_eq!(fetcher.calls_for(target), 2);
}

#[tokio::test]
async fn test_retry_failed_reopens_in_place() {
    let target = "https://example.com/page-0";
    let fetcher = Arc::new(ScriptedFetcher::new().script(target, vec![rejected(403)]));
    let harvester = harvester_with_mode(fetcher.clone(), RetryMode::Reopen);

    let id = harvester.start_batch(batch(urls(2), 3)).unwrap();
    harvester.wait(&id).await.unwrap();
    assert_eq!(harvester.get_progress(&id).unwrap().failed_urls, 1);

    let reopened = harvester.retry_failed(&id).unwrap();
    assert_eq!(reopened, id);
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.successful_urls, 2);
    assert_eq!(progress.failed_urls, 0);

    let rows = harvester.get_details(&id, true).unwrap().extractions.unwrap();
    let row = rows.iter().find(|r| r.url == target).unwrap();
    assert_eq!(row.status, ExtractionStatus::Success);
    assert_eq!(row.attempt_count, 2);

    harvester
        .storage()
        .with(|s| {
            let retries = s.list_retries(row.id)?;
            assert_eq!(retries[0].status, ExtractionStatus::Failed);
            assert_eq!(retries[1].status, ExtractionStatus::Success);
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_retry_failed_without_candidates() {
    let target = "https://example.com/page-0";
    let fetcher = Arc::new(ScriptedFetcher::new().script(
        target,
        vec![rejected(500), rejected(500)],
    ));
    let harvester = harvester_with_mode(fetcher, RetryMode::Derive);

    // The only failure used its whole budget
    let id = harvester.start_batch(batch(urls(1), 2)).unwrap();
    harvester.wait(&id).await.unwrap();
    assert_eq!(harvester.get_progress(&id).unwrap().failed_urls, 1);

    let result = harvester.retry_failed(&id);
    assert!(matches!(result, Err(HarvestError::Validation(_))));
    assert_eq!(harvester.list_sessions(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_retry_failed_rejects_running_session() {
    let fetcher = Arc::new(ScriptedFetcher::new().gated());
    let harvester = harvester_with_mode(fetcher.clone(), RetryMode::Derive);

    let id = harvester.start_batch(batch(urls(2), 3)).unwrap();
    assert!(eventually(|| fetcher.started() >= 1).await);

    let result = harvester.retry_failed(&id);
    assert!(matches!(
        result,
        Err(HarvestError::InvalidSessionState {
            status: SessionStatus::InProgress,
            ..
        })
    ));

    fetcher.open_gate();
    harvester.wait(&id).await.unwrap();
}

#[tokio::test]
async fn test_failed_session_can_be_retried_by_derivation() {
    let fetcher = Arc::new(ScriptedFetcher::new().unavailable());
    let harvester = harvester_with_mode(fetcher.clone(), RetryMode::Derive);

    let failed = harvester.start_batch(batch(urls(3), 3)).unwrap();
    assert_eq!(harvester.wait(&failed).await.unwrap(), SessionStatus::Failed);

    fetcher.restore();
    let derived = harvester.retry_failed(&failed).unwrap();
    assert_eq!(harvester.wait(&derived).await.unwrap(), SessionStatus::Completed);

    let progress = harvester.get_progress(&derived).unwrap();
    assert_eq!(progress.total_urls, 3);
    assert_eq!(progress.successful_urls, 3);

    // The failed session keeps its settled counters
    let original = harvester.get_progress(&failed).unwrap();
    assert_eq!(original.status, SessionStatus::Failed);
    assert_eq!(original.failed_urls, 3);

    harvester
        .storage()
        .with(|s| {
            assert_session_invariants(&*s, &failed);
            assert_session_invariants(&*s, &derived);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_failed_session_can_be_reopened() {
    let fetcher = Arc::new(ScriptedFetcher::new().unavailable());
    let harvester = harvester_with_mode(fetcher.clone(), RetryMode::Reopen);

    // No retry budget at all; the rows were never attempted
    let id = harvester.start_batch(batch(urls(2), 0)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Failed);

    fetcher.restore();
    assert_eq!(harvester.retry_failed(&id).unwrap(), id);
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.successful_urls, 2);
    assert_eq!(progress.failed_urls, 0);

    harvester
        .storage()
        .with(|s| {
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_resume_requeues_interrupted_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("harvest.db");

    let id = {
        let mut storage = SqliteStorage::new(&db_path).unwrap();
        interrupted_session(&mut storage, 3)
    };

    let fetcher = Arc::new(ScriptedFetcher::new());
    let storage = SharedStorage::new(SqliteStorage::new(&db_path).unwrap());
    let harvester = Harvester::new(storage, fetcher.clone(), fast_config(2))
        .with_poll_interval(Duration::from_millis(20));

    let report = harvester.resume(&id).unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let rows = harvester.get_details(&id, true).unwrap().extractions.unwrap();
    assert!(rows.iter().all(|r| r.status == ExtractionStatus::Success));
    assert_eq!(rows[0].attempt_count, 2);
    assert_eq!(harvester.get_progress(&id).unwrap().successful_urls, 3);

    harvester
        .storage()
        .with(|s| {
            let retries = s.list_retries(rows[0].id)?;
            assert_eq!(retries.len(), 2);
            assert_eq!(retries[0].error_type.as_deref(), Some("interrupted"));
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_resume_fails_interrupted_attempt_without_budget() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let id = harvester
        .storage()
        .with(|s| Ok(interrupted_session(s, 1)))
        .unwrap();

    let report = harvester.resume(&id).unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.failed_urls, 1);
    assert_eq!(progress.successful_urls, 2);

    let stats = harvester.get_details(&id, false).unwrap().statistics;
    assert_eq!(stats.error_breakdown.get("interrupted"), Some(&1));
}

#[tokio::test]
async fn test_resume_interrupted_picks_up_every_session() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let (first, second) = harvester
        .storage()
        .with(|s| Ok((interrupted_session(s, 3), interrupted_session(s, 3))))
        .unwrap();

    let mut resumed = harvester.resume_interrupted().unwrap();
    resumed.sort();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(resumed, expected);

    assert_eq!(harvester.wait(&first).await.unwrap(), SessionStatus::Completed);
    assert_eq!(harvester.wait(&second).await.unwrap(), SessionStatus::Completed);
}

#[tokio::test]
async fn test_resume_rejects_finished_session() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let id = harvester.start_batch(batch(urls(1), 3)).unwrap();
    harvester.wait(&id).await.unwrap();

    assert!(matches!(
        harvester.resume(&id),
        Err(HarvestError::InvalidSessionState {
            status: SessionStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_shutdown_leaves_session_resumable() {
    let fetcher = Arc::new(ScriptedFetcher::new().gated());
    let harvester = harvester(fetcher.clone(), fast_config(1));

    let id = harvester.start_batch(batch(urls(4), 3)).unwrap();
    assert!(eventually(|| fetcher.started() == 1).await);

    fetcher.open_gate();
    harvester.shutdown().await;

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.status, SessionStatus::InProgress);
    assert!(progress.successful_urls < 4);

    harvester.resume(&id).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);
    assert_eq!(harvester.get_progress(&id).unwrap().successful_urls, 4);
}
