//! Engine services: run state, dispatch, phase graph, theory tracking,
//! convergence, aggregation and the run driver.

pub mod convergence_policy;
pub mod orchestrator;
pub mod result_aggregator;
pub mod run_state;
pub mod task_graph;
pub mod theory_tracker;
pub mod worker_dispatcher;

pub use convergence_policy::{should_continue, Decision};
pub use orchestrator::{Orchestrator, RunRequest, RunSummary};
pub use result_aggregator::ResultAggregator;
pub use run_state::{Admission, RecoveryReport, RunState};
pub use task_graph::{Gate, PhaseKind, PhaseSpec, UnitScope, UnitTemplate};
pub use theory_tracker::{MergeReport, ProposalOutcome, TheoryStateTracker};
pub use worker_dispatcher::{
    DispatchEvent, DispatchHandle, Dispatched, DispatcherConfig, Rejection, RetryPolicy,
    WorkerDispatcher,
};
