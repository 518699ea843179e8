//! Implementation of the `sleuth status` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use console::style;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::store::FileStateStore;
use crate::cli::output::{colorize_status, list_table, output, truncate, CommandOutput};
use crate::domain::models::{
    Config, DispatchState, Ledger, RunMode, StopReason, TaskId, TheoryId, TheoryPriority,
    TheoryStatus, WorkerKind,
};
use crate::domain::ports::{RecordKey, StateStore};
use crate::services::run_state::read_record;

use super::{require_run_dir, resolve_state_dir};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Directory holding the run records
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct TheoryRow {
    pub id: TheoryId,
    pub status: TheoryStatus,
    pub priority: TheoryPriority,
    pub verified: bool,
    pub investigations: usize,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct DispatchRow {
    pub seq: u32,
    pub task_id: TaskId,
    pub kind: WorkerKind,
    pub phase: String,
    pub state: DispatchState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub state_dir: String,
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub dispatches_used: u32,
    pub max_dispatches: u32,
    pub completed_phases: Vec<String>,
    pub stop_reason: Option<StopReason>,
    pub finished: bool,
    pub theories: Vec<TheoryRow>,
    pub dispatches: Vec<DispatchRow>,
}

impl StatusOutput {
    pub fn from_ledger(state_dir: String, ledger: &Ledger, finished: bool) -> Self {
        let theories = ledger
            .theories_in_order()
            .into_iter()
            .map(|t| TheoryRow {
                id: t.id.clone(),
                status: t.status,
                priority: t.priority,
                verified: t.verified,
                investigations: t.investigations.len(),
                description: t.description.clone(),
            })
            .collect();
        let dispatches = ledger
            .dispatches_in_order()
            .into_iter()
            .map(|e| DispatchRow {
                seq: e.seq,
                task_id: e.task_id.clone(),
                kind: e.kind,
                phase: e.phase.clone(),
                state: e.state,
                attempts: e.attempts,
                failure: e.failure.clone(),
            })
            .collect();
        Self {
            state_dir,
            run_id: ledger.run_id,
            mode: ledger.mode,
            started_at: ledger.started_at,
            dispatches_used: ledger.dispatch_count(),
            max_dispatches: ledger.max_dispatches,
            completed_phases: ledger.completed_phases.clone(),
            stop_reason: ledger.stop_reason.clone(),
            finished,
            theories,
            dispatches,
        }
    }
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let state = if self.finished {
            style("finished").green().bold()
        } else {
            style("in progress").yellow()
        };
        let mut lines = vec![
            format!("Run {} ({}, {state})", self.run_id, self.mode),
            format!("  Directory:   {}", self.state_dir),
            format!("  Started:     {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!("  Dispatches:  {}/{}", self.dispatches_used, self.max_dispatches),
        ];
        if !self.completed_phases.is_empty() {
            lines.push(format!("  Phases done: {}", self.completed_phases.join(", ")));
        }
        if let Some(reason) = &self.stop_reason {
            lines.push(format!("  Stopped:     {}", reason.as_str()));
        }

        if !self.theories.is_empty() {
            let mut table = list_table(&["id", "status", "priority", "tests", "description"]);
            for t in &self.theories {
                let status = if t.verified {
                    format!("{} (verified)", colorize_status(t.status.as_str()))
                } else {
                    colorize_status(t.status.as_str()).to_string()
                };
                table.add_row(vec![
                    truncate(t.id.as_str(), 24),
                    status,
                    t.priority.as_str().to_string(),
                    t.investigations.to_string(),
                    truncate(&t.description, 60),
                ]);
            }
            lines.push(format!("\n{} theories:", self.theories.len()));
            lines.push(table.to_string());
        }

        if self.dispatches.is_empty() {
            lines.push("\nNo dispatches yet.".to_string());
        } else {
            let mut table = list_table(&["seq", "task", "kind", "state", "attempts", "failure"]);
            for d in &self.dispatches {
                table.add_row(vec![
                    d.seq.to_string(),
                    d.task_id.to_string(),
                    d.kind.to_string(),
                    colorize_status(d.state.as_str()).to_string(),
                    d.attempts.to_string(),
                    d.failure.as_deref().map(|f| truncate(f, 40)).unwrap_or_default(),
                ]);
            }
            lines.push(format!("\n{} dispatches:", self.dispatches.len()));
            lines.push(table.to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: StatusArgs, config: Config, json_mode: bool) -> Result<()> {
    let state_dir = resolve_state_dir(args.state_dir, &config);
    require_run_dir(&state_dir)?;

    let store = FileStateStore::open(&state_dir).await?;
    let ledger: Ledger = read_record(&store, &RecordKey::Ledger)
        .await
        .context("Failed to read the run ledger")?
        .with_context(|| format!("No run found in {}", state_dir.display()))?;
    let finished = store.read(&RecordKey::FinalArtifact).await?.is_some();

    output(
        &StatusOutput::from_ledger(store.location(), &ledger, finished),
        json_mode,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DispatchEntry, Theory, TheoryOrigin};

    fn sample_ledger() -> Ledger {
        let mut ledger = Ledger::new(RunMode::Investigate, 12);
        let theory = Theory::new(
            "use-after-free in sock_release",
            TheoryPriority::High,
            vec!["sock_release".to_string()],
            TheoryOrigin { seq: 0, position: 0 },
        );
        let theory_id = theory.id.clone();
        ledger.theories.insert(theory.id.clone(), theory);
        let task_id = TaskId::new("inv-001-hypothesis").unwrap();
        let mut entry = DispatchEntry::new(
            task_id.clone(),
            WorkerKind::Hypothesis,
            "investigation",
            ledger.next_seq(),
            Some(theory_id),
        );
        entry.transition_to(DispatchState::Running).unwrap();
        entry.transition_to(DispatchState::Failed).unwrap();
        entry.failure = Some("exit status 1".to_string());
        ledger.dispatches.insert(task_id, entry);
        ledger
    }

    #[test]
    fn test_status_rows_follow_ledger() {
        let ledger = sample_ledger();
        let status = StatusOutput::from_ledger("/tmp/run".to_string(), &ledger, false);
        assert_eq!(status.theories.len(), 1);
        assert_eq!(status.dispatches.len(), 1);
        assert_eq!(status.dispatches_used, 1);
        assert_eq!(status.dispatches[0].failure.as_deref(), Some("exit status 1"));

        let human = status.to_human();
        assert!(human.contains("inv-001-hypothesis"));
        assert!(human.contains("1/12"));

        let json = status.to_json();
        assert_eq!(json["mode"], "investigate");
        assert_eq!(json["theories"][0]["status"], "active");
        assert_eq!(json["finished"], false);
    }

    #[tokio::test]
    async fn test_missing_run_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = StatusArgs {
            state_dir: Some(dir.path().join("nothing-here")),
        };
        let err = execute(args, Config::default(), true).await.unwrap_err();
        assert!(err.to_string().contains("No run found"));
    }
}
