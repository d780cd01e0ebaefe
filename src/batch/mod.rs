//! Batch extraction orchestration
//!
//! # Components
//!
//! - `planner`: Splits a URL list into numbered chunks
//! - `classifier`: Maps fetch outcomes to success, retryable or terminal
//! - `backoff`: Exponential retry delays
//! - `executor`: Runs and persists a single attempt
//! - `pool`: Bounded set of workers pulling work from the store
//! - `controller`: Public entry point managing session lifecycles

mod backoff;
mod classifier;
mod controller;
mod executor;
mod planner;
mod pool;

pub use backoff::{Backoff, RETRY_STRATEGY};
pub use classifier::{classify, classify_status, Classification};
pub use controller::{Harvester, Progress, SessionDetails, StartBatch};
pub use executor::TaskExecutor;
pub use planner::{chunk_slot, plan_batch, plan_chunks, BatchPlan, ChunkSlot};
pub use pool::WorkerPool;

/// Current time in Unix epoch milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
