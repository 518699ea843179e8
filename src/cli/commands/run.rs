//! Implementation of the `sleuth run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::style;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::adapters::context::JsonContextPreparer;
use crate::adapters::store::{FileStateStore, InMemoryStateStore};
use crate::adapters::workers::{ScriptedWorker, WorkerRegistry};
use crate::cli::output::{colorize_status, output, CommandOutput};
use crate::cli::progress::render_events;
use crate::cli::UnresolvedOutcome;
use crate::domain::models::{Config, RunMode, RunOutcome, Severity};
use crate::domain::ports::StateStore;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Orchestrator, RunRequest, RunSummary};

use super::resolve_state_dir;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Fan-out analysis of a change under review
    Review,
    /// Iterative theory investigation of a defect
    Investigate,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Review => Self::Review,
            ModeArg::Investigate => Self::Investigate,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Defect reference: a context JSON file, a patch, a report file or free text
    pub reference: String,

    /// Pipeline to run
    #[arg(short, long, value_enum, default_value = "investigate")]
    pub mode: ModeArg,

    /// Hard ceiling on worker dispatches
    #[arg(long)]
    pub max_dispatches: Option<u32>,

    /// Maximum simultaneously running workers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Phase or worker-kind name to skip (repeatable)
    #[arg(long = "skip", value_name = "NAME")]
    pub skip: Vec<String>,

    /// Second defect-history reference bounding the forward history search
    #[arg(long, value_name = "REF")]
    pub forward_boundary: Option<String>,

    /// Directory holding the run records
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Archive any existing run instead of resuming it
    #[arg(long)]
    pub fresh: bool,

    /// Walk the phase graph without invoking any worker or touching the state directory
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 1 when the run ends unconfirmed or with issues found
    #[arg(long)]
    pub strict: bool,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(max) = self.max_dispatches {
            config.run.max_dispatches = max;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.max_concurrency = concurrency;
        }
        for name in &self.skip {
            if !config.run.is_skipped(name) {
                config.run.skip.push(name.clone());
            }
        }
        if let Some(boundary) = &self.forward_boundary {
            config.run.forward_boundary = Some(boundary.clone());
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.display().to_string();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub dry_run: bool,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mark = match s.outcome {
            RunOutcome::Confirmed | RunOutcome::NoIssues => style("\u{2713}").green().bold(),
            RunOutcome::Unconfirmed | RunOutcome::IssuesFound => style("\u{2717}").yellow().bold(),
        };
        let mut lines = vec![format!(
            "{mark} Run {} finished: {}",
            s.run_id,
            colorize_status(s.outcome.as_str())
        )];

        let mut mode = s.mode.as_str().to_string();
        if s.resumed {
            mode.push_str(" (resumed)");
        }
        if self.dry_run {
            mode.push_str(" (dry run)");
        }
        lines.push(format!("  Mode:        {mode}"));
        if let Some(reason) = &s.stop_reason {
            lines.push(format!("  Stopped:     {}", reason.as_str()));
        }
        lines.push(format!("  Dispatches:  {}/{}", s.dispatches_used, s.max_dispatches));
        if let Some(theory) = &s.confirmed_theory {
            lines.push(format!("  Confirmed:   {theory}"));
        }
        if let Some(commit) = &s.suspect {
            lines.push(format!("  Suspect:     {commit}"));
        }
        if s.issue_count > 0 || s.severity > Severity::None {
            lines.push(format!(
                "  Issues:      {} (highest severity: {})",
                s.issue_count,
                s.severity.as_str()
            ));
        }
        lines.push(format!("  Artifact:    {}", s.artifact_location));
        if let Some(archived) = &s.archived {
            lines.push(format!("  Archived:    {archived}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Scratch directory for worker task and result files, next to the run directory.
fn scratch_dir(state_dir: &Path) -> PathBuf {
    state_dir
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("scratch")
}

pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<()> {
    args.apply_to(&mut config);
    ConfigLoader::validate(&config).context("Invalid run configuration")?;

    let state_dir = resolve_state_dir(args.state_dir.clone(), &config);
    let (store, workers): (Arc<dyn StateStore>, WorkerRegistry) = if args.dry_run {
        (
            Arc::new(InMemoryStateStore::new()),
            WorkerRegistry::uniform(Arc::new(ScriptedWorker::dry_run())),
        )
    } else {
        let registry = WorkerRegistry::from_config(&config.workers, &scratch_dir(&state_dir))
            .context("Failed to configure workers")?;
        if registry.is_empty() {
            anyhow::bail!(
                "No workers configured: set workers.default_command or workers.commands, or use --dry-run"
            );
        }
        let store = FileStateStore::open(&state_dir)
            .await
            .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;
        (Arc::new(store), registry)
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = render_events(rx, json_mode);

    let request = RunRequest {
        reference: args.reference.clone(),
        mode: args.mode.into(),
        fresh: args.fresh,
    };
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(workers),
        Arc::new(JsonContextPreparer::default()),
        config,
    )
    .with_events(tx);

    let result = orchestrator.run(request).await;
    drop(orchestrator);
    if tokio::time::timeout(Duration::from_secs(1), renderer).await.is_err() {
        tracing::debug!("progress renderer did not finish");
    }

    let summary = result.context("Run aborted")?;
    let outcome = summary.outcome;
    output(
        &RunOutput {
            summary,
            dry_run: args.dry_run,
        },
        json_mode,
    );

    if args.strict && matches!(outcome, RunOutcome::Unconfirmed | RunOutcome::IssuesFound) {
        return Err(UnresolvedOutcome(outcome).into());
    }
    Ok(())
}
