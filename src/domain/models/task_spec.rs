//! Task specification domain model.
//!
//! A task specification is the input to exactly one worker invocation. It is
//! persisted before dispatch and never changed afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::theory::TheoryId;

/// Deterministic, filesystem-safe identifier of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Build a task id, rejecting characters that are unsafe in record keys.
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err("Task id cannot be empty".to_string());
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(format!("Task id {raw:?} contains invalid character {bad:?}"));
        }
        if raw.starts_with('.') {
            return Err(format!("Task id {raw:?} cannot start with '.'"));
        }
        Ok(Self(raw))
    }

    /// Build a task id from parts, replacing unsafe characters with `_`.
    pub fn sanitized(parts: &[&str]) -> Self {
        let joined = parts
            .iter()
            .map(|p| {
                p.chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join(".");
        let trimmed = joined.trim_start_matches('.');
        if trimmed.is_empty() {
            Self("unit".to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// The closed set of worker kinds the orchestrator knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// Analyses the reproducing procedure; primary source of grounded theories.
    Reproducer,
    /// Generates initial theories when none were seeded.
    Survey,
    /// Tests one theory and returns a verdict.
    Hypothesis,
    /// Reviews one context segment in the review pipeline.
    ChangeAnalysis,
    /// Looks up an external crash-reporting system.
    CrashReport,
    /// Searches defect history up to a forward boundary.
    HistorySearch,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 6] = [
        Self::Reproducer,
        Self::Survey,
        Self::Hypothesis,
        Self::ChangeAnalysis,
        Self::CrashReport,
        Self::HistorySearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reproducer => "reproducer",
            Self::Survey => "survey",
            Self::Hypothesis => "hypothesis",
            Self::ChangeAnalysis => "change-analysis",
            Self::CrashReport => "crash-report",
            Self::HistorySearch => "history-search",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim().to_lowercase().replace('_', "-"))
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub kind: WorkerKind,
    /// Phase that produced this unit.
    pub phase: String,
    /// Free-form instruction payload.
    pub instruction: String,
    /// Record keys of prior context the worker should read instead of
    /// rediscovering it (e.g. `context`, `results/<task-id>`).
    #[serde(default)]
    pub context_refs: Vec<String>,
    /// Theory under test (investigation mode).
    #[serde(default)]
    pub theory: Option<TheoryId>,
    /// Context segment under review (review mode).
    #[serde(default)]
    pub segment: Option<String>,
    /// Forward-search boundary for history search.
    #[serde(default)]
    pub boundary: Option<String>,
}

impl TaskSpec {
    pub fn new(
        task_id: TaskId,
        kind: WorkerKind,
        phase: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            kind,
            phase: phase.into(),
            instruction: instruction.into(),
            context_refs: vec!["context".to_string()],
            theory: None,
            segment: None,
            boundary: None,
        }
    }

    pub fn with_theory(mut self, theory: TheoryId) -> Self {
        self.theory = Some(theory);
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn with_context_ref(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.context_refs.contains(&key) {
            self.context_refs.push(key);
        }
        self
    }
}
