//! The run ledger: theories plus dispatch entries.
//!
//! The ledger is the only mutable record of a run. It is rewritten as a whole
//! after every mutation, so a restarted process can rebuild all derived state
//! from it and the immutable result records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dispatch::{DispatchEntry, DispatchState};
use super::task_spec::{TaskId, WorkerKind};
use super::theory::{Theory, TheoryId, TheoryStatus};

/// Which pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Context gathering, fan-out analysis, aggregation.
    Review,
    /// Iterative theory investigation.
    Investigate,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Investigate => "investigate",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the investigation loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "theory")]
pub enum StopReason {
    /// A theory was confirmed with worker-verified evidence.
    Confirmed(TheoryId),
    /// The hard dispatch ceiling was reached.
    BudgetExhausted,
    /// No active theories (and no bootstrap steps) remain.
    NoActiveTheories,
    /// All planned units of the phase graph reached a terminal outcome.
    PhasesComplete,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "confirmed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::NoActiveTheories => "no_active_theories",
            Self::PhasesComplete => "phases_complete",
        }
    }
}

/// Durable orchestration state for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Captured once when the ledger is created.
    pub started_at: DateTime<Utc>,
    pub max_dispatches: u32,
    #[serde(default)]
    pub theories: BTreeMap<TheoryId, Theory>,
    #[serde(default)]
    pub dispatches: BTreeMap<TaskId, DispatchEntry>,
    /// Steps owed before hypothesis investigation may start.
    #[serde(default)]
    pub bootstrap: Vec<WorkerKind>,
    #[serde(default)]
    pub seeded: bool,
    #[serde(default)]
    pub completed_phases: Vec<String>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl Ledger {
    pub fn new(mode: RunMode, max_dispatches: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            max_dispatches,
            theories: BTreeMap::new(),
            dispatches: BTreeMap::new(),
            bootstrap: Vec::new(),
            seeded: false,
            completed_phases: Vec::new(),
            stop_reason: None,
        }
    }

    /// Number of dispatches charged against the budget.
    pub fn dispatch_count(&self) -> u32 {
        u32::try_from(self.dispatches.len()).unwrap_or(u32::MAX)
    }

    pub fn budget_remaining(&self) -> u32 {
        self.max_dispatches.saturating_sub(self.dispatch_count())
    }

    pub fn next_seq(&self) -> u32 {
        self.dispatches.values().map(|d| d.seq).max().unwrap_or(0) + 1
    }

    /// Dispatch entries in dispatch order.
    pub fn dispatches_in_order(&self) -> Vec<&DispatchEntry> {
        let mut entries: Vec<&DispatchEntry> = self.dispatches.values().collect();
        entries.sort_by_key(|d| (d.seq, d.task_id.clone()));
        entries
    }

    /// Theories in creation (FIFO) order.
    pub fn theories_in_order(&self) -> Vec<&Theory> {
        let mut theories: Vec<&Theory> = self.theories.values().collect();
        theories.sort_by(|a, b| a.origin.cmp(&b.origin).then_with(|| a.id.cmp(&b.id)));
        theories
    }

    pub fn active_theories(&self) -> impl Iterator<Item = &Theory> {
        self.theories.values().filter(|t| t.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active_theories().count()
    }

    pub fn count_with_status(&self, status: TheoryStatus) -> usize {
        self.theories.values().filter(|t| t.status == status).count()
    }

    /// First theory confirmed with worker-verified evidence, in creation order.
    pub fn verified_confirmation(&self) -> Option<&Theory> {
        self.theories_in_order()
            .into_iter()
            .find(|t| t.is_verified_confirmation())
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &DispatchEntry> {
        self.dispatches
            .values()
            .filter(|d| matches!(d.state, DispatchState::Pending | DispatchState::Running))
    }

    /// Terminal entries whose outcome has not yet been folded into the ledger.
    pub fn unmerged(&self) -> Vec<TaskId> {
        let mut entries: Vec<&DispatchEntry> = self
            .dispatches
            .values()
            .filter(|d| d.is_terminal() && !d.merged)
            .collect();
        entries.sort_by_key(|d| d.seq);
        entries.into_iter().map(|d| d.task_id.clone()).collect()
    }

    pub fn phase_completed(&self, phase: &str) -> bool {
        self.completed_phases.iter().any(|p| p == phase)
    }

    pub fn mark_phase_completed(&mut self, phase: &str) {
        if !self.phase_completed(phase) {
            self.completed_phases.push(phase.to_string());
        }
    }
}
