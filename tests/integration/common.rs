//! Shared fixtures: a scripted in-process page fetcher and harvester setup

use async_trait::async_trait;
use batch_harvest::config::{BatchConfig, RetryMode, UserAgentConfig};
use batch_harvest::fetch::{FetchError, FetchOutcome, PageContent, PageFetcher};
use batch_harvest::storage::{SharedStorage, SqliteStorage, Storage};
use batch_harvest::{Harvester, SessionStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Fetcher that answers from per-URL scripts and records what it was asked
///
/// URLs without a script (or whose script ran out) succeed.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    gate: Option<Semaphore>,
    unavailable: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every fetch blocks until [`ScriptedFetcher::open_gate`] is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// `ready()` reports the fetcher as unavailable
    pub fn unavailable(self) -> Self {
        self.unavailable.store(true, Ordering::SeqCst);
        self
    }

    /// Ends an outage started with [`ScriptedFetcher::unavailable`]
    pub fn restore(&self) {
        self.unavailable.store(false, Ordering::SeqCst);
    }

    pub fn script(self, url: &str, outcomes: Vec<FetchOutcome>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(url.to_string(), outcomes.into());
        }
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ready(&self) -> Result<(), FetchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(FetchError::Unavailable("scripted outage".to_string()))
        } else {
            Ok(())
        }
    }

    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.calls.lock().unwrap().push(url.to_string());
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| ok_page(url))
    }
}

pub fn ok_page(url: &str) -> FetchOutcome {
    FetchOutcome::Page(PageContent {
        status: 200,
        final_url: url.to_string(),
        bytes: 512,
        links_found: 4,
        title: Some("Page".to_string()),
    })
}

pub fn rejected(status: u16) -> FetchOutcome {
    FetchOutcome::Rejected {
        status,
        message: format!("HTTP {}", status),
    }
}

pub fn urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://example.com/page-{}", i))
        .collect()
}

/// Batch settings that keep tests fast
pub fn fast_config(concurrency: u32) -> BatchConfig {
    BatchConfig {
        concurrency,
        attempt_timeout_ms: 2_000,
        backoff_base_ms: 10,
        ..BatchConfig::default()
    }
}

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        agent_name: "TestHarvester".to_string(),
        agent_version: "1.0".to_string(),
        contact_url: "https://example.com/about".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

pub fn harvester(fetcher: Arc<ScriptedFetcher>, config: BatchConfig) -> Harvester {
    let storage = SharedStorage::new(SqliteStorage::new_in_memory().unwrap());
    Harvester::new(storage, fetcher, config).with_poll_interval(Duration::from_millis(20))
}

pub fn harvester_with_mode(fetcher: Arc<ScriptedFetcher>, mode: RetryMode) -> Harvester {
    harvester(
        fetcher,
        BatchConfig {
            retry_mode: mode,
            ..fast_config(2)
        },
    )
}

/// Asserts the bookkeeping invariants that hold for any session at rest
pub fn assert_session_invariants(storage: &dyn Storage, session_id: &str) {
    let session = storage.get_session(session_id).unwrap();
    let settled = session.successful_urls + session.failed_urls;
    assert!(settled <= session.total_urls);
    if matches!(
        session.status,
        SessionStatus::Completed | SessionStatus::Failed
    ) {
        assert_eq!(settled, session.total_urls, "{} is {}", session_id, session.status);
    }

    let rows = storage.list_extractions(session_id).unwrap();
    assert_eq!(rows.len() as u32, session.total_urls);

    for row in rows {
        assert!(row.attempt_count <= row.max_retries.max(1));

        let retries = storage.list_retries(row.id).unwrap();
        assert_eq!(retries.len() as u32, row.attempt_count, "{}", row.url);
        for (i, retry) in retries.iter().enumerate() {
            assert_eq!(retry.attempt_number, i as u32 + 1, "{}", row.url);
        }
    }
}

/// Polls `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
