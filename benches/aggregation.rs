//! Criterion benchmarks for final-artifact aggregation.
//!
//! Review runs with many units reporting overlapping findings are the
//! expensive case: every finding is keyed, deduplicated and sorted.

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use sleuth::domain::models::{
    DispatchEntry, DispatchState, Finding, FindingKind, Ledger, ResultRecord, RunMode, Severity,
    TaskId, WorkerKind,
};
use sleuth::services::ResultAggregator;

const SEVERITIES: [Severity; 4] = [Severity::Low, Severity::Medium, Severity::High, Severity::Urgent];

/// A finished review ledger with `units` completed dispatches, each reporting
/// four findings of which half are shared with every other unit.
fn review_run(units: u32) -> (Ledger, BTreeMap<TaskId, ResultRecord>) {
    let mut ledger = Ledger::new(RunMode::Review, units);
    let mut results = BTreeMap::new();

    for seq in 1..=units {
        let task_id = TaskId::new(format!("analysis.change-analysis.FILE-{seq}")).unwrap();
        let mut entry = DispatchEntry::new(
            task_id.clone(),
            WorkerKind::ChangeAnalysis,
            "analysis",
            seq,
            None,
        );
        entry.state = DispatchState::Completed;
        entry.attempts = 1;
        entry.merged = true;
        ledger.dispatches.insert(task_id.clone(), entry);

        let severity = SEVERITIES[(seq as usize) % SEVERITIES.len()];
        let record = ResultRecord::completed()
            .with_finding(
                Finding::new(FindingKind::Observation, "reference leaked on the error path")
                    .with_severity(severity)
                    .with_symbols(&["sock_put", "sk_free"]),
            )
            .with_finding(
                Finding::new(FindingKind::Observation, "Missing  NULL check after allocation")
                    .with_severity(Severity::Medium),
            )
            .with_finding(
                Finding::new(FindingKind::Observation, format!("unchecked return in hunk {seq}"))
                    .with_severity(Severity::Low),
            )
            .with_finding(Finding::new(
                FindingKind::Observation,
                format!("style nit in hunk {seq}"),
            ))
            .with_suspect(format!("{:08x}", seq % 7));
        results.insert(task_id, record);
    }
    (ledger, results)
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    for units in [10u32, 100, 1000] {
        let (ledger, results) = review_run(units);
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, _| {
            b.iter(|| ResultAggregator::aggregate(black_box(&ledger), black_box(&results)));
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let (ledger, results) = review_run(500);
    let artifact = ResultAggregator::aggregate(&ledger, &results);
    c.bench_function("render_500_units", |b| {
        b.iter(|| ResultAggregator::render(black_box(&artifact)).unwrap());
    });
}

criterion_group!(benches, bench_aggregate, bench_render);
criterion_main!(benches);
