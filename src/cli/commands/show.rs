//! Implementation of the `sleuth show` command.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::adapters::store::FileStateStore;
use crate::domain::models::{Config, FinalArtifact};
use crate::domain::ports::RecordKey;
use crate::services::run_state::read_record;
use crate::services::ResultAggregator;

use super::{require_run_dir, resolve_state_dir};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Directory holding the run records
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

/// The artifact is JSON already, so `--json` changes nothing here.
pub async fn execute(args: ShowArgs, config: Config, _json_mode: bool) -> Result<()> {
    let state_dir = resolve_state_dir(args.state_dir, &config);
    require_run_dir(&state_dir)?;

    let store = FileStateStore::open(&state_dir).await?;
    let artifact: FinalArtifact = read_record(&store, &RecordKey::FinalArtifact)
        .await
        .context("Failed to read the final artifact")?
        .with_context(|| {
            format!(
                "Run in {} has no final artifact yet; `sleuth run` resumes it",
                state_dir.display()
            )
        })?;

    let bytes = ResultAggregator::render(&artifact)?;
    std::io::stdout()
        .lock()
        .write_all(&bytes)
        .context("Failed to write artifact to stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Ledger, RunMode};
    use crate::services::run_state::create_record;

    #[tokio::test]
    async fn test_show_without_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        create_record(&store, &RecordKey::Ledger, &Ledger::new(RunMode::Review, 4))
            .await
            .unwrap();

        let args = ShowArgs {
            state_dir: Some(dir.path().to_path_buf()),
        };
        let err = execute(args, Config::default(), false).await.unwrap_err();
        assert!(err.to_string().contains("no final artifact"));
    }

    #[tokio::test]
    async fn test_show_prints_stored_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let ledger = Ledger::new(RunMode::Review, 0);
        let artifact = ResultAggregator::aggregate(&ledger, &Default::default());
        create_record(&store, &RecordKey::FinalArtifact, &artifact)
            .await
            .unwrap();

        let args = ShowArgs {
            state_dir: Some(dir.path().to_path_buf()),
        };
        execute(args, Config::default(), false).await.unwrap();
    }
}
