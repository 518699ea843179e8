//! Dispatch ledger entries.
//!
//! One entry tracks one unit of work from `pending` through `running` to a
//! terminal state. Entries are what the dispatch budget counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ResultRecord;
use super::task_spec::{TaskId, WorkerKind};
use super::theory::TheoryId;

/// Lifecycle of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn valid_transitions(&self) -> Vec<DispatchState> {
        match self {
            Self::Pending => vec![Self::Running, Self::Failed],
            Self::Running => vec![Self::Completed, Self::Failed, Self::TimedOut],
            Self::Completed | Self::Failed | Self::TimedOut => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

/// Normalized outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(ResultRecord),
    Failed(String),
    TimedOut,
}

impl DispatchOutcome {
    pub fn state(&self) -> DispatchState {
        match self {
            Self::Completed(_) => DispatchState::Completed,
            Self::Failed(_) => DispatchState::Failed,
            Self::TimedOut => DispatchState::TimedOut,
        }
    }

    pub fn result(&self) -> Option<&ResultRecord> {
        match self {
            Self::Completed(record) => Some(record),
            Self::Failed(_) | Self::TimedOut => None,
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(reason) => Some(reason.clone()),
            Self::TimedOut => Some("timed out".to_string()),
        }
    }
}

/// Ledger entry for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub task_id: TaskId,
    pub kind: WorkerKind,
    pub phase: String,
    /// Dispatch order within the run, starting at 1.
    pub seq: u32,
    #[serde(default)]
    pub theory: Option<TheoryId>,
    pub state: DispatchState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Worker invocations made for this unit (retries included).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failure: Option<String>,
    /// Record key of the result, set once the result record is persisted.
    #[serde(default)]
    pub result_key: Option<String>,
    /// The result (or failure) has been folded into derived ledger state.
    #[serde(default)]
    pub merged: bool,
}

impl DispatchEntry {
    pub fn new(
        task_id: TaskId,
        kind: WorkerKind,
        phase: impl Into<String>,
        seq: u32,
        theory: Option<TheoryId>,
    ) -> Self {
        Self {
            task_id,
            kind,
            phase: phase.into(),
            seq,
            theory,
            state: DispatchState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            failure: None,
            result_key: None,
            merged: false,
        }
    }

    pub fn transition_to(&mut self, new_state: DispatchState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition dispatch {} from {} to {}",
                self.task_id,
                self.state.as_str(),
                new_state.as_str()
            ));
        }
        self.state = new_state;
        if new_state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_lifecycle() {
        let mut entry = DispatchEntry::new(
            TaskId::new("inv-001-survey").unwrap(),
            WorkerKind::Survey,
            "investigation",
            1,
            None,
        );
        assert_eq!(entry.state, DispatchState::Pending);
        assert!(entry.transition_to(DispatchState::Completed).is_err());
        assert!(entry.transition_to(DispatchState::Running).is_ok());
        assert!(entry.transition_to(DispatchState::TimedOut).is_ok());
        assert!(entry.finished_at.is_some());
        assert!(entry.transition_to(DispatchState::Completed).is_err());
    }

    #[test]
    fn test_outcome_state_mapping() {
        assert_eq!(
            DispatchOutcome::Completed(ResultRecord::completed()).state(),
            DispatchState::Completed
        );
        assert_eq!(DispatchOutcome::TimedOut.state(), DispatchState::TimedOut);
        assert_eq!(
            DispatchOutcome::Failed("x".into()).failure_reason(),
            Some("x".to_string())
        );
    }
}
