//! Integration tests for the batch orchestrator
//!
//! Session tests drive the full start/claim/fetch/persist cycle with a
//! scripted in-process fetcher; fetcher tests use wiremock servers.

mod common;
mod recovery_tests;
mod session_tests;
