//! Run driver: phase graph execution from context to final artifact.
//!
//! A run either resumes the ledger found in the store or archives the
//! previous run and starts a new one. Phases execute in dependency order;
//! each completed phase is recorded in the ledger so a resumed run skips it.
//! Worker failures never abort a run. Store and context-preparation failures
//! do, before any artifact is written.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::adapters::workers::WorkerRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, ContextRecord, DispatchState, RunMode, RunOutcome, Severity, StopReason, TheoryId,
    WorkerKind,
};
use crate::domain::ports::{ContextPreparer, RecordKey, StateStore};
use crate::services::convergence_policy::{self, Decision};
use crate::services::result_aggregator::ResultAggregator;
use crate::services::run_state::{create_record, RunState};
use crate::services::task_graph::{self, PhaseKind, PhaseSpec, PlanningContext};
use crate::services::theory_tracker::TheoryStateTracker;
use crate::services::worker_dispatcher::{
    DispatchEvent, Dispatched, DispatcherConfig, Rejection, WorkerDispatcher,
};

/// One `run` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Raw defect reference handed to the context preparer.
    pub reference: String,
    pub mode: RunMode,
    /// Archive any existing run instead of resuming it.
    pub fresh: bool,
}

/// Terminal summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub outcome: RunOutcome,
    pub stop_reason: Option<StopReason>,
    pub dispatches_used: u32,
    pub max_dispatches: u32,
    pub artifact_location: String,
    pub resumed: bool,
    pub archived: Option<String>,
    pub issue_count: usize,
    pub severity: Severity,
    pub confirmed_theory: Option<TheoryId>,
    pub suspect: Option<String>,
}

/// Drives one run end to end.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    workers: Arc<WorkerRegistry>,
    preparer: Arc<dyn ContextPreparer>,
    config: Config,
    events: Option<mpsc::UnboundedSender<DispatchEvent>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        workers: Arc<WorkerRegistry>,
        preparer: Arc<dyn ContextPreparer>,
        config: Config,
    ) -> Self {
        Self {
            store,
            workers,
            preparer,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn run(&self, request: RunRequest) -> DomainResult<RunSummary> {
        let mut archived = None;
        let finished = self.store.read(&RecordKey::FinalArtifact).await?.is_some();
        if finished || request.fresh {
            archived = self.store.archive().await?;
            if let Some(location) = &archived {
                tracing::info!(archive = %location, "previous run archived");
            }
        }

        let (state, resumed) = RunState::open(
            self.store.clone(),
            request.mode,
            self.config.run.max_dispatches,
        )
        .await?;
        let state = Arc::new(state);
        let run_id = state.snapshot().await.run_id;

        let span = tracing::info_span!("run", run_id = %run_id, mode = %request.mode);
        async {
            if resumed {
                state.recover_interrupted().await?;
            }
            let mut summary = self.execute(&state, &request).await?;
            summary.resumed = resumed;
            summary.archived = archived;
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    fn phases(&self, mode: RunMode) -> Vec<PhaseSpec> {
        let phases = match mode {
            RunMode::Review => task_graph::review_pipeline(),
            RunMode::Investigate => task_graph::investigation(),
        };
        phases
            .into_iter()
            .map(|p| match p.kind {
                PhaseKind::FanOut => p.with_batch_size(self.config.run.analysis_batch_size),
                _ => p,
            })
            .collect()
    }

    fn dispatcher(&self, state: &Arc<RunState>) -> WorkerDispatcher {
        let dispatcher = WorkerDispatcher::new(
            state.clone(),
            self.workers.clone(),
            DispatcherConfig::from_config(&self.config),
        );
        match &self.events {
            Some(tx) => dispatcher.with_events(tx.clone()),
            None => dispatcher,
        }
    }

    async fn execute(&self, state: &Arc<RunState>, request: &RunRequest) -> DomainResult<RunSummary> {
        let phases = self.phases(request.mode);
        let order = task_graph::topological_order(&phases)?;
        let dispatcher = self.dispatcher(state);
        let mut context: Option<ContextRecord> = None;

        for phase in order {
            let span = tracing::info_span!("phase", phase = %phase.name);
            let completed = state.snapshot().await.phase_completed(&phase.name);

            let summary = async {
                match phase.kind {
                    PhaseKind::Context => {
                        context = Some(self.context_phase(state, &request.reference).await?);
                    }
                    _ if completed => {
                        tracing::debug!("phase already completed");
                    }
                    PhaseKind::FanOut => {
                        let ctx = require_context(context.as_ref())?;
                        self.fan_out_phase(&dispatcher, phase, ctx).await?;
                    }
                    PhaseKind::Iterative => {
                        let ctx = require_context(context.as_ref())?;
                        self.investigation_phase(&dispatcher, phase, ctx).await?;
                    }
                    PhaseKind::Aggregation => return self.aggregation_phase(state).await.map(Some),
                }
                Ok::<_, DomainError>(None)
            }
            .instrument(span)
            .await?;

            if let Some(summary) = summary {
                return Ok(summary);
            }
            if !completed {
                let name = phase.name.clone();
                state
                    .mutate(|ledger| {
                        ledger.mark_phase_completed(&name);
                        Ok(())
                    })
                    .await?;
            }
        }

        Err(DomainError::UnknownPhase(task_graph::AGGREGATION_PHASE.to_string()))
    }

    async fn context_phase(&self, state: &RunState, reference: &str) -> DomainResult<ContextRecord> {
        if let Some(existing) = state.context().await? {
            if existing.reference != reference {
                tracing::warn!(
                    persisted = %existing.reference,
                    requested = %reference,
                    "resuming with the persisted context; use --fresh to start over"
                );
            }
            return Ok(existing);
        }

        let context = self.preparer.prepare(reference).await?;
        context.validate().map_err(DomainError::ContextPreparation)?;
        match create_record(state.store().as_ref(), &RecordKey::Context, &context).await {
            Ok(()) => {}
            Err(DomainError::AlreadyExists(_)) => {
                return state
                    .context()
                    .await?
                    .ok_or_else(|| DomainError::RecordMissing(RecordKey::Context.to_string()));
            }
            Err(e) => return Err(e),
        }
        tracing::info!(
            preparer = self.preparer.name(),
            category = context.category.as_str(),
            segments = context.segments.len(),
            seeds = context.seed_theories.len(),
            "context prepared"
        );
        Ok(context)
    }

    async fn fan_out_phase(
        &self,
        dispatcher: &WorkerDispatcher,
        phase: &PhaseSpec,
        context: &ContextRecord,
    ) -> DomainResult<()> {
        let planning = PlanningContext {
            context,
            run: &self.config.run,
        };
        let planned = task_graph::plan_units(phase, &planning);
        let mut ids = BTreeSet::new();
        if let Some(spec) = planned.iter().find(|spec| !ids.insert(&spec.task_id)) {
            return Err(DomainError::ValidationFailed(format!(
                "phase {} planned unit {} twice",
                phase.name, spec.task_id
            )));
        }
        let ledger = dispatcher.state().snapshot().await;
        let pending: Vec<_> = planned
            .into_iter()
            .filter(|spec| !ledger.dispatches.contains_key(&spec.task_id))
            .collect();
        tracing::info!(units = pending.len(), batch_size = ?phase.batch_size, "fan-out planned");

        let batch_size = phase.batch_size.unwrap_or(pending.len()).max(1);
        let mut over_budget = false;
        for (batch, chunk) in pending.chunks(batch_size).enumerate() {
            let mut handles = Vec::with_capacity(chunk.len());
            for spec in chunk {
                match dispatcher.dispatch_background(spec.clone()).await? {
                    Ok(handle) => handles.push(handle),
                    Err(Rejection::OverBudget) => over_budget = true,
                    Err(Rejection::Duplicate) => {
                        return Err(DomainError::StoreCorrupted(format!(
                            "unit {} already has a ledger entry",
                            spec.task_id
                        )));
                    }
                }
            }
            tracing::debug!(batch, units = handles.len(), "batch dispatched");
            dispatcher.wait_all(handles).await?;
        }

        let phase_name = phase.name.clone();
        dispatcher
            .state()
            .mutate(|ledger| {
                for entry in ledger.dispatches.values_mut() {
                    if entry.phase == phase_name && entry.is_terminal() {
                        entry.merged = true;
                    }
                }
                if over_budget && ledger.stop_reason.is_none() {
                    ledger.stop_reason = Some(StopReason::BudgetExhausted);
                }
                Ok(())
            })
            .await
    }

    async fn investigation_phase(
        &self,
        dispatcher: &WorkerDispatcher,
        phase: &PhaseSpec,
        context: &ContextRecord,
    ) -> DomainResult<()> {
        let state = dispatcher.state();
        if self.config.run.is_skipped(&phase.name) {
            tracing::info!("phase skipped");
            return state
                .mutate(|ledger| {
                    ledger.stop_reason.get_or_insert(StopReason::PhasesComplete);
                    Ok(())
                })
                .await;
        }

        let skipped: BTreeSet<WorkerKind> = self
            .config
            .run
            .skip
            .iter()
            .filter_map(|name| WorkerKind::from_str(name))
            .collect();
        let tracker = TheoryStateTracker::new(self.config.run.dedup_similarity)
            .with_skipped(skipped)
            .with_forward_boundary(self.config.run.forward_boundary.clone());

        state
            .mutate(|ledger| {
                tracker.seed(ledger, context);
                Ok(())
            })
            .await?;

        loop {
            merge_pending(state, &tracker).await?;

            let ledger = state.snapshot().await;
            if let Decision::Stop(reason) = convergence_policy::evaluate(&ledger) {
                tracing::info!(
                    reason = reason.as_str(),
                    dispatches = ledger.dispatch_count(),
                    "investigation converged"
                );
                return set_stop_reason(state, reason).await;
            }

            let Some(spec) = state.mutate(|ledger| Ok(tracker.next_unit(ledger))).await? else {
                return set_stop_reason(state, StopReason::NoActiveTheories).await;
            };
            tracing::info!(task_id = %spec.task_id, kind = %spec.kind, theory = ?spec.theory, "dispatching");

            match dispatcher.dispatch(&spec).await? {
                Dispatched::Outcome(_) => {}
                Dispatched::Rejected(Rejection::OverBudget) => {
                    return set_stop_reason(state, StopReason::BudgetExhausted).await;
                }
                Dispatched::Rejected(Rejection::Duplicate) => {
                    return Err(DomainError::StoreCorrupted(format!(
                        "unit {} already has a ledger entry",
                        spec.task_id
                    )));
                }
            }
        }
    }

    async fn aggregation_phase(&self, state: &RunState) -> DomainResult<RunSummary> {
        state
            .mutate(|ledger| {
                ledger.stop_reason.get_or_insert(StopReason::PhasesComplete);
                Ok(())
            })
            .await?;

        let ledger = state.snapshot().await;
        let results = state.results().await?;
        let artifact = ResultAggregator::aggregate(&ledger, &results);
        create_record(state.store().as_ref(), &RecordKey::FinalArtifact, &artifact).await?;

        let location = state.store().record_location(&RecordKey::FinalArtifact);
        tracing::info!(
            outcome = artifact.outcome.as_str(),
            dispatches = artifact.dispatches_used,
            findings = artifact.findings.len(),
            artifact = %location,
            "final artifact written"
        );

        Ok(RunSummary {
            run_id: artifact.run_id,
            mode: artifact.mode,
            outcome: artifact.outcome,
            stop_reason: artifact.stop_reason,
            dispatches_used: artifact.dispatches_used,
            max_dispatches: artifact.max_dispatches,
            artifact_location: location,
            resumed: false,
            archived: None,
            issue_count: artifact.issue_count,
            severity: artifact.severity,
            confirmed_theory: artifact.confirmed_theory,
            suspect: artifact.suspect,
        })
    }
}

fn require_context(context: Option<&ContextRecord>) -> DomainResult<&ContextRecord> {
    context.ok_or_else(|| DomainError::RecordMissing(RecordKey::Context.to_string()))
}

async fn set_stop_reason(state: &RunState, reason: StopReason) -> DomainResult<()> {
    state
        .mutate(|ledger| {
            ledger.stop_reason = Some(reason);
            Ok(())
        })
        .await
}

/// Fold terminal dispatch outcomes into the theory ledger in sequence order.
///
/// Stops at the first entry that follows a still-running dispatch, so the
/// ledger never depends on which unit finished first.
async fn merge_pending(state: &RunState, tracker: &TheoryStateTracker) -> DomainResult<usize> {
    let ledger = state.snapshot().await;
    let barrier = ledger.in_flight().map(|d| d.seq).min();
    let mut merged = 0;

    for task_id in ledger.unmerged() {
        let Some(entry) = ledger.dispatches.get(&task_id).cloned() else {
            continue;
        };
        if barrier.is_some_and(|seq| entry.seq > seq) {
            break;
        }
        let record = match entry.state {
            DispatchState::Completed => Some(state.result(&task_id).await?),
            _ => None,
        };
        state
            .mutate(|ledger| {
                match &record {
                    Some(record) => {
                        tracker.apply_result(ledger, &entry, record);
                    }
                    None => {
                        let reason = entry.failure.as_deref().unwrap_or("failed");
                        tracker.apply_failure(ledger, &entry, reason);
                    }
                }
                Ok(())
            })
            .await?;
        merged += 1;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::context::JsonContextPreparer;
    use crate::adapters::store::InMemoryStateStore;
    use crate::adapters::workers::{ScriptedResponse, ScriptedWorker};
    use crate::domain::models::{ContextSegment, DefectCategory, ResultRecord};
    use crate::domain::ports::Worker;

    fn config(max_dispatches: u32) -> Config {
        let mut config = Config::default();
        config.run.max_dispatches = max_dispatches;
        config.run.poll_interval_ms = 5;
        config.retry.max_attempts = 1;
        config
    }

    fn review_context() -> String {
        let context = ContextRecord::new("patch-1", DefectCategory::PatchReview)
            .with_evidence("Reported-by: syzbot+1234@syzkaller.appspotmail.com")
            .with_segment(ContextSegment {
                id: "FILE-1".into(),
                title: "net/core/sock.c".into(),
                symbols: vec!["sock_put".into()],
                body: String::new(),
            })
            .with_segment(ContextSegment {
                id: "FILE-2".into(),
                title: "net/ipv4/tcp.c".into(),
                symbols: vec![],
                body: String::new(),
            });
        serde_json::to_string(&context).unwrap()
    }

    fn orchestrator(
        store: Arc<InMemoryStateStore>,
        worker: Arc<dyn Worker>,
        config: Config,
    ) -> Orchestrator {
        Orchestrator::new(
            store,
            Arc::new(WorkerRegistry::uniform(worker)),
            Arc::new(JsonContextPreparer::default()),
            config,
        )
    }

    async fn write_context(dir: &tempfile::TempDir, json: &str) -> String {
        let path = dir.path().join("context.json");
        tokio::fs::write(&path, json).await.unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_review_run_fans_out_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_context(&dir, &review_context()).await;
        let worker = Arc::new(ScriptedWorker::new().on_kind(
            WorkerKind::CrashReport,
            ResultRecord::completed().with_finding(
                crate::domain::models::Finding::new(
                    crate::domain::models::FindingKind::Observation,
                    "crash matches the changed path",
                )
                .with_severity(Severity::High),
            ),
        ));
        let store = Arc::new(InMemoryStateStore::new());
        let summary = orchestrator(store.clone(), worker.clone(), config(12))
            .run(RunRequest {
                reference,
                mode: RunMode::Review,
                fresh: false,
            })
            .await
            .unwrap();

        // Two segments plus the crash-report side analysis; no forward boundary.
        assert_eq!(summary.dispatches_used, 3);
        assert_eq!(worker.invocation_count().await, 3);
        assert_eq!(summary.outcome, RunOutcome::IssuesFound);
        assert_eq!(summary.severity, Severity::High);
        assert_eq!(summary.stop_reason, Some(StopReason::PhasesComplete));
        assert!(store.read(&RecordKey::FinalArtifact).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_review_budget_truncates_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_context(&dir, &review_context()).await;
        let worker = Arc::new(ScriptedWorker::new());
        let store = Arc::new(InMemoryStateStore::new());
        let summary = orchestrator(store, worker.clone(), config(2))
            .run(RunRequest {
                reference,
                mode: RunMode::Review,
                fresh: false,
            })
            .await
            .unwrap();
        assert_eq!(summary.dispatches_used, 2);
        assert_eq!(worker.invocation_count().await, 2);
        assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));
        assert_eq!(summary.outcome, RunOutcome::NoIssues);
    }

    #[tokio::test]
    async fn test_context_failure_is_fatal_and_writes_nothing() {
        let worker = Arc::new(ScriptedWorker::new());
        let store = Arc::new(InMemoryStateStore::new());
        let err = orchestrator(store.clone(), worker.clone(), config(12))
            .run(RunRequest {
                reference: "   ".to_string(),
                mode: RunMode::Investigate,
                fresh: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ContextPreparation(_)));
        assert!(err.is_fatal());
        assert_eq!(worker.invocation_count().await, 0);
        assert!(store.read(&RecordKey::FinalArtifact).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finished_run_is_archived_before_the_next() {
        let worker = Arc::new(ScriptedWorker::with_default(ScriptedResponse::Fail("down".into())));
        let store = Arc::new(InMemoryStateStore::new());
        let orchestrator = orchestrator(store.clone(), worker, config(3));
        let request = RunRequest {
            reference: "kernel BUG at mm/slub.c".to_string(),
            mode: RunMode::Investigate,
            fresh: false,
        };

        let first = orchestrator.run(request.clone()).await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Unconfirmed);
        assert!(first.archived.is_none());

        let second = orchestrator.run(request).await.unwrap();
        assert!(second.archived.is_some());
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(store.archived_runs().await.len(), 1);
    }
}
