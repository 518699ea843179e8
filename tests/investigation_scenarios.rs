//! End-to-end investigation runs against scripted workers.

mod common;

use std::sync::Arc;

use sleuth::adapters::store::InMemoryStateStore;
use sleuth::adapters::workers::{ScriptedResponse, ScriptedWorker};
use sleuth::domain::models::{
    ContextRecord, DefectCategory, FinalArtifact, Ledger, ProposedTheory, ResultRecord, RunOutcome,
    StopReason, TheoryPriority, TheoryStatus, WorkerKind, WorkerVerdict,
};
use sleuth::domain::ports::RecordKey;
use sleuth::services::run_state::read_record;

use common::{investigate, orchestrator, seeded_context, test_config, write_context};

async fn artifact(store: &InMemoryStateStore) -> FinalArtifact {
    read_record(store, &RecordKey::FinalArtifact)
        .await
        .unwrap()
        .expect("final artifact written")
}

async fn ledger(store: &InMemoryStateStore) -> Ledger {
    read_record(store, &RecordKey::Ledger)
        .await
        .unwrap()
        .expect("ledger written")
}

fn count(artifact: &FinalArtifact, status: TheoryStatus) -> usize {
    artifact.theories.iter().filter(|t| t.status == status).count()
}

#[tokio::test]
async fn test_single_dispatch_confirms_high_priority_theory() {
    let dir = common::temp_dir();
    let reference = write_context(&dir, &seeded_context());
    let worker = Arc::new(ScriptedWorker::with_default(
        ResultRecord::completed()
            .with_verdict(WorkerVerdict::Confirmed, true)
            .with_suspect("4f2a9c1e"),
    ));
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker.clone(), test_config(1))
        .run(investigate(&reference))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Confirmed);
    assert_eq!(summary.dispatches_used, 1);
    assert!(matches!(summary.stop_reason, Some(StopReason::Confirmed(_))));
    assert_eq!(worker.invocation_count().await, 1);

    let artifact = artifact(&store).await;
    assert_eq!(artifact.investigated_theories().count(), 1);
    assert_eq!(count(&artifact, TheoryStatus::Active), 2);
    let confirmed = artifact
        .theories
        .iter()
        .find(|t| t.status == TheoryStatus::Confirmed)
        .unwrap();
    assert_eq!(confirmed.priority, TheoryPriority::High);
    assert!(confirmed.verified);
    assert_eq!(artifact.confirmed_theory.as_ref(), Some(&confirmed.id));
    assert_eq!(artifact.suspect.as_deref(), Some("4f2a9c1e"));
}

#[tokio::test]
async fn test_single_inconclusive_dispatch_exhausts_budget() {
    let dir = common::temp_dir();
    let reference = write_context(&dir, &seeded_context());
    let worker = Arc::new(ScriptedWorker::with_default(
        ResultRecord::completed().with_verdict(WorkerVerdict::Inconclusive, false),
    ));
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker, test_config(1))
        .run(investigate(&reference))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Unconfirmed);
    assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));
    assert_eq!(summary.dispatches_used, 1);

    let artifact = artifact(&store).await;
    assert_eq!(count(&artifact, TheoryStatus::Inconclusive), 1);
    assert_eq!(count(&artifact, TheoryStatus::Active), 2);
    assert_eq!(artifact.confirmed_theory, None);
}

#[tokio::test]
async fn test_unverified_confirmation_does_not_stop_the_run() {
    let dir = common::temp_dir();
    let reference = write_context(&dir, &seeded_context());
    let worker = Arc::new(ScriptedWorker::with_default(
        ResultRecord::completed().with_verdict(WorkerVerdict::Confirmed, false),
    ));
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker.clone(), test_config(2))
        .run(investigate(&reference))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Unconfirmed);
    assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));
    assert_eq!(worker.invocation_count().await, 2);
}

#[tokio::test]
async fn test_zero_budget_invokes_nothing_and_still_writes_artifact() {
    let dir = common::temp_dir();
    let reference = write_context(&dir, &seeded_context());
    let worker = Arc::new(ScriptedWorker::new());
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker.clone(), test_config(0))
        .run(investigate(&reference))
        .await
        .unwrap();

    assert_eq!(worker.invocation_count().await, 0);
    assert_eq!(summary.dispatches_used, 0);
    assert_eq!(summary.outcome, RunOutcome::Unconfirmed);
    assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));

    let artifact = artifact(&store).await;
    assert!(artifact.dispatches.is_empty());
    assert_eq!(count(&artifact, TheoryStatus::Active), 3);
}

#[tokio::test]
async fn test_reproducer_runs_before_any_hypothesis() {
    let dir = common::temp_dir();
    let context = seeded_context().with_reproducer("./repro --iterations 1000");
    let reference = write_context(&dir, &context);
    let worker = Arc::new(
        ScriptedWorker::new()
            .on_kind(
                WorkerKind::Reproducer,
                ResultRecord::completed().with_new_theory(ProposedTheory::new(
                    "double free in the error path of sock_release",
                    TheoryPriority::High,
                    &["sock_release"],
                )),
            )
            .on_kind(
                WorkerKind::Hypothesis,
                ResultRecord::completed().with_verdict(WorkerVerdict::Eliminated, false),
            ),
    );
    let store = Arc::new(InMemoryStateStore::new());

    orchestrator(store.clone(), worker.clone(), test_config(3))
        .run(investigate(&reference))
        .await
        .unwrap();

    let invocations = worker.invocations().await;
    assert_eq!(invocations.len(), 3);
    assert_eq!(invocations[0].kind, WorkerKind::Reproducer);
    assert!(invocations[1..].iter().all(|spec| spec.kind == WorkerKind::Hypothesis));

    // The reproducer's proposal is merged before the next selection, and it
    // ties the high-priority seed on priority but was created later.
    let ledger = ledger(&store).await;
    let first_tested = invocations[1].theory.clone().unwrap();
    assert_eq!(ledger.theories[&first_tested].origin.seq, 0);
    assert!(ledger.bootstrap.is_empty());
}

#[tokio::test]
async fn test_rediscovered_theory_is_not_investigated_twice() {
    let dir = common::temp_dir();
    let context = ContextRecord::new("bug-99", DefectCategory::Regression)
        .with_evidence("task hung in tcp_close")
        .with_seed("lock inversion between socket and timer", TheoryPriority::Medium, &["tcp_close"]);
    let reference = write_context(&dir, &context);
    let worker = Arc::new(ScriptedWorker::with_default(
        ResultRecord::completed()
            .with_verdict(WorkerVerdict::Eliminated, false)
            .with_new_theory(ProposedTheory::new(
                "Timer callback races with close",
                TheoryPriority::Medium,
                &["tcp_close", "tcp_write_timer"],
            )),
    ));
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker.clone(), test_config(10))
        .run(investigate(&reference))
        .await
        .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::NoActiveTheories));
    assert_eq!(worker.invocation_count().await, 2);

    let ledger = ledger(&store).await;
    assert_eq!(ledger.theories.len(), 2);
    let rediscovered = ledger
        .theories
        .values()
        .find(|t| t.description == "Timer callback races with close")
        .unwrap();
    assert_eq!(rediscovered.status, TheoryStatus::Eliminated);
    assert_eq!(rediscovered.proposed_by.len(), 2);
    assert_eq!(rediscovered.investigations.len(), 1);
}

#[tokio::test]
async fn test_failed_workers_still_produce_an_artifact() {
    let dir = common::temp_dir();
    let reference = write_context(&dir, &seeded_context());
    let worker = Arc::new(ScriptedWorker::with_default(ScriptedResponse::Fail(
        "worker crashed".into(),
    )));
    let store = Arc::new(InMemoryStateStore::new());

    let summary = orchestrator(store.clone(), worker.clone(), test_config(12))
        .run(investigate(&reference))
        .await
        .unwrap();

    // Each failure settles its theory as inconclusive, so three dispatches
    // exhaust the seeded theories.
    assert_eq!(summary.dispatches_used, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::NoActiveTheories));
    assert_eq!(summary.outcome, RunOutcome::Unconfirmed);

    let artifact = artifact(&store).await;
    assert_eq!(count(&artifact, TheoryStatus::Inconclusive), 3);
    assert!(artifact.dispatches.iter().all(|d| d.failure.is_some()));
}
