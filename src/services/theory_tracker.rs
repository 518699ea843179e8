//! Theory lifecycle for iterative investigation.
//!
//! The tracker owns every rule that changes theories in the ledger: seeding,
//! choosing the next unit of work, folding a worker result in, and recording
//! a failed unit. It only mutates the [`Ledger`] it is handed; persistence is
//! the caller's job (see `RunState::mutate`).
//!
//! Results are folded in dispatch-sequence order, so the ledger does not
//! depend on the order in which workers finished.

use std::collections::BTreeSet;

use crate::domain::models::theory::{description_similarity, normalize_symbols};
use crate::domain::models::{
    ContextRecord, DispatchEntry, FindingKind, Ledger, ResultRecord, TaskId, TaskSpec, Theory,
    TheoryId, TheoryOrigin, TheoryPriority, TheoryStatus, WorkerKind, WorkerVerdict,
};
use crate::domain::ports::RecordKey;
use crate::services::task_graph::INVESTIGATION_PHASE;

/// What happened to one proposed theory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    Created(TheoryId),
    /// Folded into an existing theory (of any status).
    Merged(TheoryId),
    Ignored,
}

/// Summary of one merged result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub verdict_applied: Option<(TheoryId, TheoryStatus)>,
    pub created: Vec<TheoryId>,
    pub merged: Vec<TheoryId>,
}

/// Theory state machine and selection policy.
#[derive(Debug, Clone)]
pub struct TheoryStateTracker {
    dedup_similarity: f64,
    skipped: BTreeSet<WorkerKind>,
    forward_boundary: Option<String>,
}

impl Default for TheoryStateTracker {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl TheoryStateTracker {
    pub fn new(dedup_similarity: f64) -> Self {
        Self {
            dedup_similarity,
            skipped: BTreeSet::new(),
            forward_boundary: None,
        }
    }

    /// Worker kinds that must never be dispatched.
    pub fn with_skipped(mut self, kinds: impl IntoIterator<Item = WorkerKind>) -> Self {
        self.skipped.extend(kinds);
        self
    }

    pub fn with_forward_boundary(mut self, boundary: Option<String>) -> Self {
        self.forward_boundary = boundary.filter(|b| !b.trim().is_empty());
        self
    }

    /// Create the seed theories and the bootstrap queue. Runs once per ledger.
    ///
    /// With a reproducer the first unit is the reproducer analysis. Without
    /// seed theories a survey unit generates the initial ones.
    pub fn seed(&self, ledger: &mut Ledger, context: &ContextRecord) {
        if ledger.seeded {
            return;
        }
        for (position, seed) in context.seed_theories.iter().enumerate() {
            self.propose(
                ledger,
                &seed.description,
                seed.priority,
                seed.symbols.iter().cloned(),
                None,
                TheoryOrigin {
                    seq: 0,
                    position: u32::try_from(position).unwrap_or(u32::MAX),
                },
                None,
            );
        }

        let mut bootstrap = Vec::new();
        if context.has_reproducer() {
            bootstrap.push(WorkerKind::Reproducer);
        }
        if context.seed_theories.is_empty() {
            bootstrap.push(WorkerKind::Survey);
        }
        bootstrap.retain(|k| {
            let keep = !self.skipped.contains(k);
            if !keep {
                tracing::info!(kind = %k, "bootstrap step skipped");
            }
            keep
        });
        ledger.bootstrap = bootstrap;
        ledger.seeded = true;
        tracing::info!(
            seeds = context.seed_theories.len(),
            bootstrap = ?ledger.bootstrap,
            "theory ledger seeded"
        );
    }

    /// Highest-priority active theory; ties go to the earliest created.
    pub fn select_next<'a>(&self, ledger: &'a Ledger) -> Option<&'a Theory> {
        ledger.active_theories().min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.origin.cmp(&b.origin))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    /// Next unit of work, or `None` when there is nothing left to investigate.
    ///
    /// Drops a pending survey step once active theories exist (e.g. the
    /// reproducer already proposed some).
    pub fn next_unit(&self, ledger: &mut Ledger) -> Option<TaskSpec> {
        while ledger.bootstrap.first() == Some(&WorkerKind::Survey) && ledger.active_count() > 0 {
            ledger.bootstrap.remove(0);
            tracing::debug!("survey step dropped, active theories exist");
        }

        let seq = ledger.next_seq();
        if let Some(&kind) = ledger.bootstrap.first() {
            let id = TaskId::sanitized(&[format!("inv-{seq:03}-{kind}").as_str()]);
            let instruction = match kind {
                WorkerKind::Reproducer => {
                    "Run and analyze the reproducer; report observations and the theories they support."
                }
                _ => "Survey the defect and propose falsifiable theories about its cause.",
            };
            return Some(TaskSpec::new(id, kind, INVESTIGATION_PHASE, instruction));
        }

        if self.skipped.contains(&WorkerKind::Hypothesis) {
            return None;
        }
        let theory = self.select_next(ledger)?;
        let id = TaskId::sanitized(&[format!("inv-{seq:03}-hypothesis-{}", theory.id).as_str()]);
        let mut spec = TaskSpec::new(
            id,
            WorkerKind::Hypothesis,
            INVESTIGATION_PHASE,
            format!(
                "Test the theory: {}. Report a verdict (confirmed, eliminated or inconclusive) with evidence.",
                theory.description
            ),
        )
        .with_theory(theory.id.clone())
        .with_context_ref(RecordKey::Ledger.path());
        for source in &theory.proposed_by {
            spec = spec.with_context_ref(format!("results/{source}"));
        }
        if let Some(boundary) = &self.forward_boundary {
            spec = spec.with_boundary(boundary.clone());
        }
        Some(spec)
    }

    /// Fold a completed unit's result into the ledger.
    pub fn apply_result(
        &self,
        ledger: &mut Ledger,
        entry: &DispatchEntry,
        record: &ResultRecord,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        self.settle_bootstrap(ledger, entry);

        if let Some(theory_id) = &entry.theory {
            let status = match record.verdict {
                Some(WorkerVerdict::Confirmed) => TheoryStatus::Confirmed,
                Some(WorkerVerdict::Eliminated) => TheoryStatus::Eliminated,
                Some(WorkerVerdict::Inconclusive) | None => TheoryStatus::Inconclusive,
            };
            if let Some(theory) = ledger.theories.get_mut(theory_id) {
                theory.investigations.insert(entry.task_id.clone());
                theory.next_steps.extend(record.next_steps.iter().cloned());
                if theory.transition_to(status).is_ok() {
                    theory.verified = status == TheoryStatus::Confirmed && record.verified;
                    report.verdict_applied = Some((theory_id.clone(), status));
                    tracing::info!(
                        theory = %theory_id,
                        status = status.as_str(),
                        verified = theory.verified,
                        task_id = %entry.task_id,
                        "theory verdict applied"
                    );
                } else {
                    tracing::warn!(
                        theory = %theory_id,
                        current = theory.status.as_str(),
                        ignored = status.as_str(),
                        task_id = %entry.task_id,
                        "conflicting verdict ignored, theory already decided"
                    );
                }
            } else {
                tracing::warn!(theory = %theory_id, task_id = %entry.task_id, "result for unknown theory");
            }
        }

        for finding in &record.findings {
            let target = finding.theory.as_ref().or(entry.theory.as_ref());
            let Some(theory) = target.and_then(|id| ledger.theories.get_mut(id)) else {
                continue;
            };
            match finding.kind {
                FindingKind::EvidenceFor => {
                    theory.supporting.insert(finding.text.clone());
                }
                FindingKind::EvidenceAgainst => {
                    theory.opposing.insert(finding.text.clone());
                }
                FindingKind::NewTheory | FindingKind::Observation => {}
            }
        }

        let proposals = record
            .proposals()
            .map(|p| (p.description.as_str(), p.priority, p.symbols.clone(), p.reopens.clone()))
            .chain(
                record
                    .findings
                    .iter()
                    .filter(|f| f.kind == FindingKind::NewTheory)
                    .map(|f| (f.text.as_str(), TheoryPriority::default(), f.symbols.clone(), None)),
            );
        for (position, (description, priority, symbols, reopens)) in proposals.enumerate() {
            let origin = TheoryOrigin {
                seq: entry.seq,
                position: u32::try_from(position).unwrap_or(u32::MAX),
            };
            match self.propose(
                ledger,
                description,
                priority,
                symbols,
                reopens.as_ref(),
                origin,
                Some(&entry.task_id),
            ) {
                ProposalOutcome::Created(id) => report.created.push(id),
                ProposalOutcome::Merged(id) => report.merged.push(id),
                ProposalOutcome::Ignored => {}
            }
        }

        if let Some(stored) = ledger.dispatches.get_mut(&entry.task_id) {
            stored.merged = true;
        }
        report
    }

    /// Record a unit that failed, timed out, or returned a malformed result.
    ///
    /// The theory under test becomes inconclusive.
    pub fn apply_failure(&self, ledger: &mut Ledger, entry: &DispatchEntry, reason: &str) {
        self.settle_bootstrap(ledger, entry);
        if let Some(theory) = entry.theory.as_ref().and_then(|id| ledger.theories.get_mut(id)) {
            theory.investigations.insert(entry.task_id.clone());
            if theory.transition_to(TheoryStatus::Inconclusive).is_ok() {
                tracing::warn!(theory = %theory.id, task_id = %entry.task_id, reason, "theory inconclusive after failed unit");
            }
        }
        if let Some(stored) = ledger.dispatches.get_mut(&entry.task_id) {
            stored.merged = true;
        }
    }

    fn settle_bootstrap(&self, ledger: &mut Ledger, entry: &DispatchEntry) {
        if entry.theory.is_none() && ledger.bootstrap.first() == Some(&entry.kind) {
            ledger.bootstrap.remove(0);
        }
    }

    /// Add a proposed theory unless an equivalent one already exists.
    ///
    /// Equivalent means the same symbol set and a description that is
    /// identical after normalization or at least `dedup_similarity` similar.
    /// Terminal theories are matched too, so a rediscovered eliminated theory
    /// is not investigated again; only an explicit `reopens` creates a new
    /// record for it.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        ledger: &mut Ledger,
        description: &str,
        priority: TheoryPriority,
        symbols: impl IntoIterator<Item = String>,
        reopens: Option<&TheoryId>,
        origin: TheoryOrigin,
        proposed_by: Option<&TaskId>,
    ) -> ProposalOutcome {
        let description = description.trim();
        if description.is_empty() {
            return ProposalOutcome::Ignored;
        }
        let symbols = normalize_symbols(symbols);
        let mut theory = Theory::new(description, priority, symbols.iter().cloned(), origin);

        let reopen_parent = reopens.filter(|parent| {
            ledger
                .theories
                .get(*parent)
                .is_some_and(|t| t.status.is_terminal())
        });
        if let Some(parent) = reopen_parent {
            let generation = ledger
                .theories
                .values()
                .filter(|t| t.reopens.as_ref() == Some(parent))
                .count();
            let generation = u32::try_from(generation).unwrap_or(u32::MAX);
            let already = ledger.theories.values().find(|t| {
                t.reopens.as_ref() == Some(parent) && t.status == TheoryStatus::Active
            });
            if let Some(existing) = already.map(|t| t.id.clone()) {
                self.fold(ledger, &existing, priority, origin, proposed_by);
                return ProposalOutcome::Merged(existing);
            }
            theory.id = TheoryId::derive_reopen(parent, generation + 1);
            theory.reopens = Some(parent.clone());
        } else if let Some(existing) = self.find_equivalent(ledger, &theory) {
            self.fold(ledger, &existing, priority, origin, proposed_by);
            return ProposalOutcome::Merged(existing);
        }

        if let Some(task) = proposed_by {
            theory.proposed_by.insert(task.clone());
        }
        let id = theory.id.clone();
        tracing::info!(theory = %id, priority = theory.priority.as_str(), reopens = ?theory.reopens, "theory created");
        ledger.theories.insert(id.clone(), theory);
        ProposalOutcome::Created(id)
    }

    fn find_equivalent(&self, ledger: &Ledger, candidate: &Theory) -> Option<TheoryId> {
        if ledger.theories.contains_key(&candidate.id) {
            return Some(candidate.id.clone());
        }
        ledger
            .theories_in_order()
            .into_iter()
            .filter(|t| t.reopens.is_none() && t.symbols == candidate.symbols)
            .find(|t| description_similarity(&t.description, &candidate.description) >= self.dedup_similarity)
            .map(|t| t.id.clone())
    }

    fn fold(
        &self,
        ledger: &mut Ledger,
        id: &TheoryId,
        priority: TheoryPriority,
        origin: TheoryOrigin,
        proposed_by: Option<&TaskId>,
    ) {
        if let Some(existing) = ledger.theories.get_mut(id) {
            if let Some(task) = proposed_by {
                existing.proposed_by.insert(task.clone());
            }
            if existing.is_active() {
                existing.priority = existing.priority.max(priority);
            }
            existing.origin = existing.origin.min(origin);
            tracing::debug!(theory = %id, status = existing.status.as_str(), "duplicate proposal folded");
        }
    }
}
