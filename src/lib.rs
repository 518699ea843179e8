//! Sleuth - defect investigation orchestrator
//!
//! Sleuth drives external workers through a bounded investigation of a defect
//! reference. It either fans a change under review out to analysis workers, or
//! runs an iterative loop over a ledger of competing theories until one is
//! confirmed with verified evidence or the dispatch budget runs out. All state
//! lives in a record store, so an interrupted run resumes where it stopped.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and ports
//! - **Service Layer** (`services`): run state, dispatch, phase graph, theory
//!   tracking, convergence, aggregation and the run driver
//! - **Adapters** (`adapters`): record stores, workers, context preparation
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sleuth::adapters::{context::JsonContextPreparer, store::InMemoryStateStore};
//! use sleuth::adapters::workers::{ScriptedWorker, WorkerRegistry};
//! use sleuth::{Config, Orchestrator, RunMode, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(InMemoryStateStore::new()),
//!         Arc::new(WorkerRegistry::uniform(Arc::new(ScriptedWorker::dry_run()))),
//!         Arc::new(JsonContextPreparer::default()),
//!         Config::default(),
//!     );
//!     let summary = orchestrator
//!         .run(RunRequest { reference: "oops in foo_open".into(), mode: RunMode::Investigate, fresh: false })
//!         .await?;
//!     println!("{}", summary.outcome.as_str());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, ContextRecord, FinalArtifact, Ledger, ResultRecord, RunMode, RunOutcome, StopReason,
    TaskSpec, Theory, TheoryId, TheoryStatus, WorkerKind,
};
pub use domain::ports::{ContextPreparer, RecordKey, StateStore, Worker};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    Orchestrator, ResultAggregator, RunRequest, RunState, RunSummary, TheoryStateTracker,
    WorkerDispatcher,
};
