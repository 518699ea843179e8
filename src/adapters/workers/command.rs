//! Worker backed by an external command.
//!
//! The task specification is written to a JSON file whose path is passed in
//! `SLEUTH_TASK_FILE`; the command must write its result record to the path in
//! `SLEUTH_RESULT_FILE` and exit 0. The child runs in its own process group so
//! the whole tree can be terminated when the invocation is abandoned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResultRecord, TaskSpec, WorkerCommandConfig};
use crate::domain::ports::Worker;

use super::accept_record;

/// Environment variable naming the task specification file.
pub const TASK_FILE_ENV: &str = "SLEUTH_TASK_FILE";
/// Environment variable naming the file the worker must write its result to.
pub const RESULT_FILE_ENV: &str = "SLEUTH_RESULT_FILE";

/// Time between SIGTERM and SIGKILL for an abandoned process group.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Kills a process group when dropped, unless disarmed.
///
/// A timed-out invocation drops its future, which drops this guard.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid
                .and_then(|p| i32::try_from(p).ok())
                .map(Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                tracing::debug!(pgid = pgid.as_raw(), error = %e, "process group already gone");
                return;
            }
            tracing::warn!(pgid = pgid.as_raw(), "terminated abandoned worker process group");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    let _ = killpg(pgid, Signal::SIGKILL);
                });
            }
        }
    }
}

/// Removes an invocation's task and result files when dropped, including when
/// the invocation future is abandoned.
struct ScratchFiles {
    task: PathBuf,
    result: PathBuf,
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in [&self.task, &self.result] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "cannot remove scratch file");
                }
            }
        }
    }
}

/// Runs one configured command per invocation.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    config: WorkerCommandConfig,
    scratch_dir: PathBuf,
}

impl CommandWorker {
    /// `scratch_dir` receives the per-invocation task and result files.
    pub fn new(config: WorkerCommandConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn config(&self) -> &WorkerCommandConfig {
        &self.config
    }

    fn scratch_files(&self, spec: &TaskSpec) -> ScratchFiles {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let stem = format!("{}.{}", spec.task_id, &nonce[..8]);
        ScratchFiles {
            task: self.scratch_dir.join(format!("{stem}.task.json")),
            result: self.scratch_dir.join(format!("{stem}.result.json")),
        }
    }

    async fn read_result(path: &Path) -> DomainResult<ResultRecord> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DomainError::WorkerFailed(
                    "worker exited successfully but wrote no result file".to_string(),
                ));
            }
            Err(e) => return Err(DomainError::WorkerFailed(format!("cannot read result file: {e}"))),
        };
        let record: ResultRecord = serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::MalformedResult(e.to_string()))?;
        accept_record(record)
    }
}

#[async_trait]
impl Worker for CommandWorker {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn invoke(&self, spec: &TaskSpec) -> DomainResult<ResultRecord> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = self.scratch_files(spec);
        tokio::fs::write(&scratch.task, serde_json::to_vec_pretty(spec)?).await?;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env(TASK_FILE_ENV, &scratch.task)
            .env(RESULT_FILE_ENV, &scratch.result)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DomainError::WorkerFailed(format!("failed to spawn {}: {e}", self.config.command))
        })?;
        let mut guard = ProcessGroupGuard::new(child.id());
        tracing::debug!(task_id = %spec.task_id, pid = ?child.id(), command = %self.config.command, "worker spawned");

        let stderr_tail = match child.stderr.take() {
            Some(stderr) => {
                let task_id = spec.task_id.clone();
                Some(tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    let mut last = None;
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::trace!(task_id = %task_id, "worker: {line}");
                        last = Some(line);
                    }
                    last
                }))
            }
            None => None,
        };

        let status = child
            .wait()
            .await
            .map_err(|e| DomainError::WorkerFailed(format!("failed to wait for worker: {e}")))?;
        guard.disarm();

        let last_line = match stderr_tail {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        if !status.success() {
            let detail = last_line.map(|l| format!(": {l}")).unwrap_or_default();
            return Err(DomainError::WorkerFailed(format!(
                "worker exited with {status}{detail}"
            )));
        }

        Self::read_result(&scratch.result).await
    }
}
