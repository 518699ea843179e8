//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test utilities used across
//! multiple integration test files.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use sleuth::adapters::context::JsonContextPreparer;
use sleuth::adapters::workers::WorkerRegistry;
use sleuth::domain::models::{Config, ContextRecord, DefectCategory, RunMode, TheoryPriority};
use sleuth::domain::ports::{StateStore, Worker};
use sleuth::services::{Orchestrator, RunRequest};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Configuration with fast polling and no retries.
pub fn test_config(max_dispatches: u32) -> Config {
    let mut config = Config::default();
    config.run.max_dispatches = max_dispatches;
    config.run.poll_interval_ms = 5;
    config.retry.max_attempts = 1;
    config.workers.timeout_secs = 5;
    config
}

/// Crash context with three seeded theories of descending priority.
pub fn seeded_context() -> ContextRecord {
    ContextRecord::new("bug-4711", DefectCategory::Crash)
        .with_evidence("KASAN: use-after-free in sock_release")
        .with_symbols(["sock_release", "tcp_close"])
        .with_seed(
            "socket freed while still queued on the close path",
            TheoryPriority::High,
            &["sock_release"],
        )
        .with_seed(
            "missing reference on the timer callback",
            TheoryPriority::Medium,
            &["tcp_close"],
        )
        .with_seed(
            "stale pointer after listener migration",
            TheoryPriority::Low,
            &["inet_csk_listen_stop"],
        )
}

/// Write a context record where the file-based preparer will pick it up.
pub fn write_context(dir: &TempDir, context: &ContextRecord) -> String {
    let path = dir.path().join("context.json");
    std::fs::write(&path, serde_json::to_vec_pretty(context).expect("serialize context"))
        .expect("write context");
    path.display().to_string()
}

pub fn orchestrator(store: Arc<dyn StateStore>, worker: Arc<dyn Worker>, config: Config) -> Orchestrator {
    Orchestrator::new(
        store,
        Arc::new(WorkerRegistry::uniform(worker)),
        Arc::new(JsonContextPreparer::default()),
        config,
    )
}

pub fn investigate(reference: &str) -> RunRequest {
    RunRequest {
        reference: reference.to_string(),
        mode: RunMode::Investigate,
        fresh: false,
    }
}

pub fn review(reference: &str) -> RunRequest {
    RunRequest {
        reference: reference.to_string(),
        mode: RunMode::Review,
        fresh: false,
    }
}
