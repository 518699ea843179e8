//! Final artifact domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dispatch::DispatchState;
use super::ledger::{RunMode, StopReason};
use super::result::{FindingKind, Severity};
use super::task_spec::{TaskId, WorkerKind};
use super::theory::{Theory, TheoryId};

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// A theory was confirmed with verified evidence.
    Confirmed,
    /// Investigation ended without a verified confirmation.
    Unconfirmed,
    /// Review found at least one finding with severity above `none`.
    IssuesFound,
    /// Review found nothing above severity `none`.
    NoIssues,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Unconfirmed => "unconfirmed",
            Self::IssuesFound => "issues-found",
            Self::NoIssues => "no-issues",
        }
    }
}

/// A deduplicated finding with a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFinding {
    /// `<task-id>#<n>` of the first occurrence.
    pub id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub text: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub theory: Option<TheoryId>,
    /// Every unit that reported this finding.
    pub sources: Vec<TaskId>,
}

/// Summary line for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub task_id: TaskId,
    pub seq: u32,
    pub kind: WorkerKind,
    pub phase: String,
    pub state: DispatchState,
    #[serde(default)]
    pub theory: Option<TheoryId>,
    pub attempts: u32,
    #[serde(default)]
    pub failure: Option<String>,
}

/// The single aggregated output of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Copied from the ledger; the merge itself reads no clock.
    pub run_started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub confirmed_theory: Option<TheoryId>,
    pub dispatches_used: u32,
    pub max_dispatches: u32,
    pub severity: Severity,
    pub issue_count: usize,
    pub findings: Vec<ArtifactFinding>,
    pub theories: Vec<Theory>,
    pub dispatches: Vec<DispatchSummary>,
    #[serde(default)]
    pub suspect: Option<String>,
    #[serde(default)]
    pub summaries: Vec<(TaskId, String)>,
}

impl FinalArtifact {
    /// Theories that were investigated by at least one dispatch.
    pub fn investigated_theories(&self) -> impl Iterator<Item = &Theory> {
        self.theories.iter().filter(|t| !t.investigations.is_empty())
    }
}
