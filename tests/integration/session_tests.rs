//! End-to-end session lifecycle tests against the scripted fetcher

use crate::common::*;
use batch_harvest::config::BatchConfig;
use batch_harvest::fetch::{FetchOutcome, TransportErrorKind};
use batch_harvest::{ExtractionStatus, HarvestError, SessionStatus, StartBatch};
use std::sync::Arc;
use std::time::Duration;

fn batch(urls: Vec<String>, chunk_size: u32, max_retries: u32) -> StartBatch {
    StartBatch {
        user_id: "user-1".to_string(),
        name: Some("Integration".to_string()),
        source_url: "https://example.com".to_string(),
        urls,
        chunk_size: Some(chunk_size),
        max_retries: Some(max_retries),
    }
}

#[tokio::test]
async fn test_all_urls_succeed_and_session_completes() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(3), 2, 3)).unwrap();
    let status = harvester.wait(&id).await.unwrap();
    assert_eq!(status, SessionStatus::Completed);

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.total_urls, 3);
    assert_eq!(progress.successful_urls, 3);
    assert_eq!(progress.failed_urls, 0);
    assert!((progress.progress_percent - 100.0).abs() < f64::EPSILON);

    let details = harvester.get_details(&id, true).unwrap();
    let slots: Vec<(u32, u32)> = details
        .extractions
        .unwrap()
        .iter()
        .map(|row| (row.chunk_number, row.position_in_chunk))
        .collect();
    assert_eq!(slots, vec![(1, 0), (1, 1), (2, 0)]);
    assert!(details.session.completed_at.is_some());
    assert_eq!(details.statistics.chunks_processed, 2);
    assert_eq!(details.statistics.total_retries, 3);

    harvester
        .storage()
        .with(|s| {
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_rate_limited_url_is_retried_until_success() {
    let target = "https://example.com/page-0";
    let fetcher = Arc::new(
        ScriptedFetcher::new().script(target, vec![rejected(429), rejected(429)]),
    );
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(1), 10, 3)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let (row, retries) = harvester
        .storage()
        .with(|s| {
            let row = s.find_extraction_by_hash(&id, &batch_harvest::url::hash_url_str(target).unwrap())?;
            let row = row.expect("row exists");
            let retries = s.list_retries(row.id)?;
            Ok((row, retries))
        })
        .unwrap();

    assert_eq!(row.status, ExtractionStatus::Success);
    assert_eq!(row.attempt_count, 3);
    let statuses: Vec<ExtractionStatus> = retries.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ExtractionStatus::Retrying,
            ExtractionStatus::Retrying,
            ExtractionStatus::Success
        ]
    );
    assert!(retries.iter().all(|r| r.retry_strategy == "exponential_backoff"));
    assert_eq!(retries[0].error_type.as_deref(), Some("rate_limited"));

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.successful_urls, 1);
    assert_eq!(progress.failed_urls, 0);
    assert_eq!(fetcher.calls_for(target), 3);
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let target = "https://example.com/page-0";
    let fetcher = Arc::new(ScriptedFetcher::new().script(target, vec![rejected(404)]));
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(2), 10, 3)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let details = harvester.get_details(&id, true).unwrap();
    let rows = details.extractions.unwrap();
    let failed = rows.iter().find(|r| r.url == target).unwrap();
    assert_eq!(failed.status, ExtractionStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.http_status, Some(404));
    assert_eq!(failed.error_type.as_deref(), Some("client_error"));

    assert_eq!(details.session.failed_urls, 1);
    assert_eq!(details.session.successful_urls, 1);
    assert_eq!(details.statistics.error_breakdown.get("client_error"), Some(&1));
    assert_eq!(fetcher.calls_for(target), 1);
}

#[tokio::test]
async fn test_retries_exhausted_marks_failed() {
    let target = "https://example.com/page-0";
    let fetcher = Arc::new(ScriptedFetcher::new().script(
        target,
        vec![rejected(503), rejected(503), rejected(503), rejected(503)],
    ));
    let harvester = harvester(fetcher.clone(), fast_config(1));

    let id = harvester.start_batch(batch(urls(1), 10, 3)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let rows = harvester.get_details(&id, true).unwrap().extractions.unwrap();
    assert_eq!(rows[0].status, ExtractionStatus::Failed);
    assert_eq!(rows[0].attempt_count, 3);
    assert!(rows[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("retries exhausted after 3 attempts"));
    assert_eq!(fetcher.calls_for(target), 3);

    harvester
        .storage()
        .with(|s| {
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_transport_failures_follow_classification() {
    let reset = "https://example.com/page-0";
    let refused = "https://example.com/page-1";
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .script(
                reset,
                vec![FetchOutcome::Transport {
                    kind: TransportErrorKind::ConnectionReset,
                    message: "connection reset by peer".to_string(),
                }],
            )
            .script(
                refused,
                vec![FetchOutcome::Transport {
                    kind: TransportErrorKind::ConnectionFailed,
                    message: "connection refused".to_string(),
                }],
            ),
    );
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(2), 10, 3)).unwrap();
    harvester.wait(&id).await.unwrap();

    let rows = harvester.get_details(&id, true).unwrap().extractions.unwrap();
    let reset_row = rows.iter().find(|r| r.url == reset).unwrap();
    let refused_row = rows.iter().find(|r| r.url == refused).unwrap();

    assert_eq!(reset_row.status, ExtractionStatus::Success);
    assert_eq!(reset_row.attempt_count, 2);
    assert_eq!(refused_row.status, ExtractionStatus::Failed);
    assert_eq!(refused_row.attempt_count, 1);
    assert_eq!(refused_row.error_type.as_deref(), Some("connection_failed"));
}

#[tokio::test]
async fn test_slow_fetch_times_out_and_is_retried() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(300)));
    let config = BatchConfig {
        attempt_timeout_ms: 100,
        ..fast_config(1)
    };
    let harvester = harvester(fetcher.clone(), config);

    let id = harvester.start_batch(batch(urls(1), 10, 2)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    let rows = harvester.get_details(&id, true).unwrap().extractions.unwrap();
    assert_eq!(rows[0].status, ExtractionStatus::Failed);
    assert_eq!(rows[0].attempt_count, 2);
    assert_eq!(rows[0].error_type.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_cancel_mid_run_freezes_pending_rows() {
    let fetcher = Arc::new(ScriptedFetcher::new().gated());
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(7), 10, 3)).unwrap();
    assert!(eventually(|| fetcher.started() == 2).await);

    harvester.cancel(&id).unwrap();
    fetcher.open_gate();
    let status = harvester.wait(&id).await.unwrap();
    assert_eq!(status, SessionStatus::Cancelled);

    // Give any stray worker a chance to misbehave
    tokio::time::sleep(Duration::from_millis(100)).await;

    let details = harvester.get_details(&id, true).unwrap();
    let rows = details.extractions.unwrap();
    let succeeded = rows
        .iter()
        .filter(|r| r.status == ExtractionStatus::Success)
        .count();
    let pending = rows
        .iter()
        .filter(|r| r.status == ExtractionStatus::Pending)
        .count();

    assert_eq!(succeeded, 2);
    assert_eq!(pending, 5);
    assert_eq!(details.session.status, SessionStatus::Cancelled);
    assert_eq!(details.session.successful_urls, 2);
    assert_eq!(fetcher.started(), 2);
}

#[tokio::test]
async fn test_cancel_requires_in_progress() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let id = harvester.start_batch(batch(urls(1), 10, 3)).unwrap();
    harvester.wait(&id).await.unwrap();

    let result = harvester.cancel(&id);
    assert!(matches!(
        result,
        Err(HarvestError::InvalidSessionState {
            status: SessionStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(30)));
    let harvester = harvester(fetcher.clone(), fast_config(3));

    let id = harvester.start_batch(batch(urls(12), 4, 3)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Completed);

    assert_eq!(fetcher.started(), 12);
    assert!(fetcher.max_in_flight() <= 3);
    assert!(fetcher.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_rows_are_dispatched_in_chunk_order() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher.clone(), fast_config(1));

    let submitted = urls(5);
    let id = harvester.start_batch(batch(submitted.clone(), 2, 3)).unwrap();
    harvester.wait(&id).await.unwrap();

    assert_eq!(fetcher.calls(), submitted);
}

#[tokio::test]
async fn test_duplicates_are_dropped_and_recorded() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let submitted = vec![
        "https://example.com/a".to_string(),
        "https://www.example.com/a/".to_string(),
        "https://example.com/b".to_string(),
    ];
    let id = harvester.start_batch(batch(submitted, 10, 3)).unwrap();
    harvester.wait(&id).await.unwrap();

    let details = harvester.get_details(&id, false).unwrap();
    assert_eq!(details.session.total_urls, 2);
    assert_eq!(details.session.metadata["duplicates_skipped"], 1);
    assert_eq!(details.session.metadata["submitted_urls"], 3);
    assert!(details.extractions.is_none());

    let progress = harvester.get_progress(&id).unwrap();
    assert_eq!(progress.duplicates_skipped, 1);
    assert_eq!(progress.total_urls, 2);
}

#[tokio::test]
async fn test_start_batch_validation() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let empty = harvester.start_batch(batch(vec![], 10, 3));
    assert!(matches!(empty, Err(HarvestError::Validation(_))));

    let too_many = harvester.start_batch(batch(urls(26), 10, 3));
    assert!(matches!(too_many, Err(HarvestError::Validation(_))));

    let zero_chunk = harvester.start_batch(batch(urls(2), 0, 3));
    assert!(matches!(zero_chunk, Err(HarvestError::Validation(_))));

    let bad_url = harvester.start_batch(batch(vec!["ftp://example.com/x".to_string()], 10, 3));
    assert!(matches!(bad_url, Err(HarvestError::Validation(_))));

    let no_user = harvester.start_batch(StartBatch {
        user_id: " ".to_string(),
        ..batch(urls(1), 10, 3)
    });
    assert!(matches!(no_user, Err(HarvestError::Validation(_))));

    assert!(harvester.list_sessions(None).unwrap().is_empty());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_defaults_apply_when_unspecified() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let id = harvester
        .start_batch(StartBatch {
            user_id: "user-1".to_string(),
            source_url: "https://example.com".to_string(),
            urls: urls(1),
            ..StartBatch::default()
        })
        .unwrap();
    harvester.wait(&id).await.unwrap();

    let session = harvester.get_details(&id, false).unwrap().session;
    assert_eq!(session.chunk_size, 10);
    assert_eq!(session.max_retries, 3);
    assert!(session.name.starts_with("Batch extraction "));
}

#[tokio::test]
async fn test_unavailable_fetcher_fails_session() {
    let fetcher = Arc::new(ScriptedFetcher::new().unavailable());
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let id = harvester.start_batch(batch(urls(2), 10, 3)).unwrap();
    assert_eq!(harvester.wait(&id).await.unwrap(), SessionStatus::Failed);

    let details = harvester.get_details(&id, true).unwrap();
    assert!(details
        .session
        .metadata
        .get("failure_reason")
        .and_then(|v| v.as_str())
        .unwrap()
        .contains("scripted outage"));
    assert_eq!(details.session.successful_urls, 0);
    assert_eq!(details.session.failed_urls, 2);
    assert!(details.extractions.unwrap().iter().all(|r| {
        r.status == ExtractionStatus::Failed
            && r.attempt_count == 0
            && r.error_type.as_deref() == Some("aborted")
    }));
    assert_eq!(details.statistics.error_breakdown.get("aborted"), Some(&2));
    assert!(fetcher.calls().is_empty());

    harvester
        .storage()
        .with(|s| {
            assert_session_invariants(&*s, &id);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_delete_cascades_and_reports_missing() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    let id = harvester.start_batch(batch(urls(3), 2, 3)).unwrap();
    harvester.wait(&id).await.unwrap();
    let row_id = harvester.get_details(&id, true).unwrap().extractions.unwrap()[0].id;

    harvester.delete(&id).await.unwrap();

    assert!(matches!(
        harvester.get_progress(&id),
        Err(HarvestError::SessionNotFound(_))
    ));
    let retries = harvester.storage().with(|s| s.list_retries(row_id)).unwrap();
    assert!(retries.is_empty());
    assert!(matches!(
        harvester.delete(&id).await,
        Err(HarvestError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_stops_running_session() {
    let fetcher = Arc::new(ScriptedFetcher::new().gated());
    let harvester = harvester(fetcher.clone(), fast_config(1));

    let id = harvester.start_batch(batch(urls(3), 10, 3)).unwrap();
    assert!(eventually(|| fetcher.started() == 1).await);

    fetcher.open_gate();
    harvester.delete(&id).await.unwrap();
    assert!(harvester.list_sessions(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(5)));
    let harvester = harvester(fetcher.clone(), fast_config(2));

    let first = harvester.start_batch(batch(urls(4), 2, 3)).unwrap();
    let second = harvester
        .start_batch(StartBatch {
            user_id: "user-2".to_string(),
            ..batch(urls(3), 2, 3)
        })
        .unwrap();

    assert_eq!(harvester.wait(&first).await.unwrap(), SessionStatus::Completed);
    assert_eq!(harvester.wait(&second).await.unwrap(), SessionStatus::Completed);

    assert_eq!(harvester.get_progress(&first).unwrap().successful_urls, 4);
    assert_eq!(harvester.get_progress(&second).unwrap().successful_urls, 3);
    assert_eq!(harvester.list_sessions(Some("user-2")).unwrap().len(), 1);
    assert_eq!(harvester.list_sessions(None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let harvester = harvester(fetcher, fast_config(2));

    assert!(matches!(
        harvester.get_progress("missing"),
        Err(HarvestError::SessionNotFound(_))
    ));
    assert!(matches!(
        harvester.get_details("missing", true),
        Err(HarvestError::SessionNotFound(_))
    ));
    assert!(matches!(
        harvester.cancel("missing"),
        Err(HarvestError::SessionNotFound(_))
    ));
}
