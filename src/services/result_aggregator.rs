//! Deterministic merge of all result records into the final artifact.
//!
//! The merge is a pure function of the ledger and the result records. It
//! reads no clock and iterates only ordered collections, so aggregating the
//! same store contents twice renders byte-identical output.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::errors::DomainResult;
use crate::domain::models::theory::normalize_description;
use crate::domain::models::{
    ArtifactFinding, DispatchSummary, FinalArtifact, FindingKind, Ledger, ResultRecord, RunMode,
    RunOutcome, Severity, TaskId, TheoryId,
};

type FindingKey = (FindingKind, String, Vec<String>, Option<TheoryId>);

/// Builds the final artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Merge every completed dispatch's result into one artifact.
    ///
    /// Results are visited in dispatch order. A finding reported by several
    /// units is kept once, under the identifier of its first occurrence
    /// (`<task-id>#<n>`), with every reporting unit listed as a source and the
    /// highest reported severity.
    pub fn aggregate(ledger: &Ledger, results: &BTreeMap<TaskId, ResultRecord>) -> FinalArtifact {
        let entries = ledger.dispatches_in_order();

        let mut findings: Vec<ArtifactFinding> = Vec::new();
        let mut index: BTreeMap<FindingKey, usize> = BTreeMap::new();
        let mut summaries = Vec::new();

        for entry in &entries {
            let Some(record) = results.get(&entry.task_id) else {
                continue;
            };
            if let Some(summary) = record.summary.as_deref().filter(|s| !s.trim().is_empty()) {
                summaries.push((entry.task_id.clone(), summary.to_string()));
            }
            for (n, finding) in record.findings.iter().enumerate() {
                let symbols: Vec<String> = finding
                    .symbols
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let theory = finding.theory.clone().or_else(|| entry.theory.clone());
                let key = (
                    finding.kind,
                    normalize_description(&finding.text),
                    symbols.clone(),
                    theory.clone(),
                );
                match index.get(&key) {
                    Some(&at) => {
                        let merged = &mut findings[at];
                        merged.severity = merged.severity.max(finding.severity);
                        if !merged.sources.contains(&entry.task_id) {
                            merged.sources.push(entry.task_id.clone());
                        }
                    }
                    None => {
                        index.insert(key, findings.len());
                        findings.push(ArtifactFinding {
                            id: format!("{}#{}", entry.task_id, n + 1),
                            kind: finding.kind,
                            severity: finding.severity,
                            text: finding.text.trim().to_string(),
                            symbols,
                            theory,
                            sources: vec![entry.task_id.clone()],
                        });
                    }
                }
            }
        }

        let severity = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::None);
        let issue_count = findings.iter().filter(|f| f.severity > Severity::None).count();

        let confirmed = ledger.verified_confirmation();
        let outcome = match ledger.mode {
            RunMode::Investigate if confirmed.is_some() => RunOutcome::Confirmed,
            RunMode::Investigate => RunOutcome::Unconfirmed,
            RunMode::Review if issue_count > 0 => RunOutcome::IssuesFound,
            RunMode::Review => RunOutcome::NoIssues,
        };

        let suspect = confirmed
            .and_then(|theory| {
                entries
                    .iter()
                    .filter(|e| theory.investigations.contains(&e.task_id))
                    .filter_map(|e| results.get(&e.task_id))
                    .flat_map(|r| r.suspect_commits.iter())
                    .map(|c| c.trim())
                    .find(|c| !c.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| most_cited_commit(results));

        let dispatches = entries
            .iter()
            .map(|e| DispatchSummary {
                task_id: e.task_id.clone(),
                seq: e.seq,
                kind: e.kind,
                phase: e.phase.clone(),
                state: e.state,
                theory: e.theory.clone(),
                attempts: e.attempts,
                failure: e.failure.clone(),
            })
            .collect();

        FinalArtifact {
            run_id: ledger.run_id,
            mode: ledger.mode,
            run_started_at: ledger.started_at,
            outcome,
            stop_reason: ledger.stop_reason.clone(),
            confirmed_theory: confirmed.map(|t| t.id.clone()),
            dispatches_used: ledger.dispatch_count(),
            max_dispatches: ledger.max_dispatches,
            severity,
            issue_count,
            findings,
            theories: ledger.theories_in_order().into_iter().cloned().collect(),
            dispatches,
            suspect,
            summaries,
        }
    }

    /// Canonical serialized form of the artifact.
    pub fn render(artifact: &FinalArtifact) -> DomainResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(artifact)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Commit named by the most results; ties go to the lexicographically smallest.
fn most_cited_commit(results: &BTreeMap<TaskId, ResultRecord>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in results.values() {
        let distinct: BTreeSet<&str> = record
            .suspect_commits
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        for commit in distinct {
            *counts.entry(commit).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .fold(None::<(&str, usize)>, |best, (commit, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((commit, count)),
        })
        .map(|(commit, _)| commit.to_string())
}
