//! Domain models for the Sleuth orchestrator.

pub mod artifact;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod ledger;
pub mod result;
pub mod task_spec;
pub mod theory;

pub use artifact::{ArtifactFinding, DispatchSummary, FinalArtifact, RunOutcome};
pub use config::{
    Config, LoggingConfig, RetryConfig, RunConfig, WorkerCommandConfig, WorkersConfig,
};
pub use context::{ContextRecord, ContextSegment, DefectCategory, SeedTheory};
pub use dispatch::{DispatchEntry, DispatchOutcome, DispatchState};
pub use ledger::{Ledger, RunMode, StopReason};
pub use result::{
    Finding, FindingKind, ProposedTheory, ResultRecord, ResultStatus, Severity, WorkerVerdict,
};
pub use task_spec::{TaskId, TaskSpec, WorkerKind};
pub use theory::{Theory, TheoryId, TheoryOrigin, TheoryPriority, TheoryStatus};
