//! Bounded, budgeted worker dispatch.
//!
//! Every dispatch is admitted against the run ledger first (budget and
//! duplicate checks), then runs its attempts under a shared semaphore with a
//! per-attempt timeout. Outcomes are normalized to [`DispatchOutcome`]; only
//! state-store errors escape as `Err`.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::adapters::workers::WorkerRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, DispatchOutcome, DispatchState, RetryConfig, TaskId, TaskSpec, WorkerKind,
};
use crate::services::run_state::{Admission, RunState};

/// Attempts per unit and the delay between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// No retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum simultaneously running worker invocations.
    pub max_concurrency: usize,
    /// Timeout for a single attempt.
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    /// How often [`WorkerDispatcher::wait_all`] checks background units.
    pub poll_interval: Duration,
}

impl DispatcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.run.max_concurrency.max(1),
            attempt_timeout: Duration::from_secs(config.workers.timeout_secs),
            retry: RetryPolicy::from_config(&config.retry),
            poll_interval: Duration::from_millis(config.run.poll_interval_ms.max(1)),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a unit was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The task id already has a ledger entry.
    Duplicate,
    /// The dispatch ceiling is reached.
    OverBudget,
}

/// Result of a foreground dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Outcome(DispatchOutcome),
    Rejected(Rejection),
}

/// Event emitted while dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Started { task_id: TaskId, kind: WorkerKind, attempt: u32 },
    Retrying { task_id: TaskId, attempt: u32, max_attempts: u32, delay: Duration, reason: String },
    Finished { task_id: TaskId, state: DispatchState, attempts: u32 },
    /// The ledger entry was already terminal; the outcome was dropped.
    Discarded { task_id: TaskId },
    Rejected { task_id: TaskId, reason: Rejection },
    Progress { completed: usize, total: usize, failed: usize },
}

/// A unit running in the background.
#[derive(Debug)]
pub struct DispatchHandle {
    task_id: TaskId,
    state: watch::Receiver<DispatchState>,
    join: JoinHandle<DomainResult<DispatchOutcome>>,
}

impl DispatchHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Last observed state, without waiting.
    pub fn poll(&self) -> DispatchState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.poll().is_terminal() || self.join.is_finished()
    }

    pub async fn join(self) -> DomainResult<DispatchOutcome> {
        self.join
            .await
            .map_err(|e| DomainError::WorkerFailed(format!("dispatch {} aborted: {e}", self.task_id)))?
    }
}

/// Runs units of work against the configured workers.
#[derive(Clone)]
pub struct WorkerDispatcher {
    state: Arc<RunState>,
    workers: Arc<WorkerRegistry>,
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
    events: Option<mpsc::UnboundedSender<DispatchEvent>>,
}

impl WorkerDispatcher {
    pub fn new(state: Arc<RunState>, workers: Arc<WorkerRegistry>, config: DispatcherConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            state,
            workers,
            semaphore,
            config,
            events: None,
        }
    }

    /// Stream dispatch events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    async fn admit(&self, spec: &TaskSpec) -> DomainResult<Option<Rejection>> {
        let rejection = match self.state.begin_dispatch(spec).await? {
            Admission::Admitted { .. } => return Ok(None),
            Admission::Duplicate => Rejection::Duplicate,
            Admission::BudgetExhausted => Rejection::OverBudget,
        };
        tracing::info!(task_id = %spec.task_id, reason = ?rejection, "dispatch rejected");
        self.emit(DispatchEvent::Rejected {
            task_id: spec.task_id.clone(),
            reason: rejection,
        });
        Ok(Some(rejection))
    }

    /// Dispatch one unit and wait for its outcome.
    pub async fn dispatch(&self, spec: &TaskSpec) -> DomainResult<Dispatched> {
        if let Some(rejection) = self.admit(spec).await? {
            return Ok(Dispatched::Rejected(rejection));
        }
        let outcome = self.run(spec, None).await?;
        Ok(Dispatched::Outcome(outcome))
    }

    /// Admit one unit now and run it in the background.
    ///
    /// Admission happens before this returns, so the budget is charged in
    /// call order even though units finish in any order.
    pub async fn dispatch_background(
        &self,
        spec: TaskSpec,
    ) -> DomainResult<Result<DispatchHandle, Rejection>> {
        if let Some(rejection) = self.admit(&spec).await? {
            return Ok(Err(rejection));
        }
        let (tx, rx) = watch::channel(DispatchState::Pending);
        let task_id = spec.task_id.clone();
        let this = self.clone();
        let join = tokio::spawn(async move { this.run(&spec, Some(tx)).await });
        Ok(Ok(DispatchHandle {
            task_id,
            state: rx,
            join,
        }))
    }

    /// Wait for every handle, reporting progress each time it changes.
    pub async fn wait_all(
        &self,
        handles: Vec<DispatchHandle>,
    ) -> DomainResult<Vec<(TaskId, DispatchOutcome)>> {
        let total = handles.len();
        let mut last = None;
        loop {
            let completed = handles.iter().filter(|h| h.is_finished()).count();
            let failed = handles
                .iter()
                .filter(|h| matches!(h.poll(), DispatchState::Failed | DispatchState::TimedOut))
                .count();
            if last != Some((completed, failed)) {
                tracing::info!("Progress: {completed}/{total} (failed: {failed})");
                self.emit(DispatchEvent::Progress { completed, total, failed });
                last = Some((completed, failed));
            }
            if completed == total {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let joined = join_all(handles.into_iter().map(|handle| async move {
            let task_id = handle.task_id.clone();
            (task_id, handle.join().await)
        }))
        .await;

        let mut outcomes = Vec::with_capacity(total);
        for (task_id, joined) in joined {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(DomainError::WorkerFailed(reason)) => {
                    let outcome = DispatchOutcome::Failed(reason);
                    self.state.finish_dispatch(&task_id, &outcome).await?;
                    outcome
                }
                Err(e) => return Err(e),
            };
            outcomes.push((task_id, outcome));
        }
        Ok(outcomes)
    }

    async fn run(
        &self,
        spec: &TaskSpec,
        progress: Option<watch::Sender<DispatchState>>,
    ) -> DomainResult<DispatchOutcome> {
        let (outcome, attempts) = self.attempts(spec, progress.as_ref()).await?;
        let recorded = self.state.finish_dispatch(&spec.task_id, &outcome).await?;
        if recorded {
            tracing::info!(
                task_id = %spec.task_id,
                state = outcome.state().as_str(),
                attempts,
                "dispatch finished"
            );
            self.emit(DispatchEvent::Finished {
                task_id: spec.task_id.clone(),
                state: outcome.state(),
                attempts,
            });
        } else {
            self.emit(DispatchEvent::Discarded {
                task_id: spec.task_id.clone(),
            });
        }
        if let Some(tx) = progress {
            let _ = tx.send(outcome.state());
        }
        Ok(outcome)
    }

    async fn attempts(
        &self,
        spec: &TaskSpec,
        progress: Option<&watch::Sender<DispatchState>>,
    ) -> DomainResult<(DispatchOutcome, u32)> {
        let Some(worker) = self.workers.get(spec.kind) else {
            tracing::error!(task_id = %spec.task_id, kind = %spec.kind, "no worker configured");
            return Ok((
                DispatchOutcome::Failed(format!("no worker configured for {}", spec.kind)),
                0,
            ));
        };

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _permit = self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| DomainError::Io(format!("worker pool closed: {e}")))?;
                self.state.mark_running(&spec.task_id).await?;
                if let Some(tx) = progress {
                    let _ = tx.send(DispatchState::Running);
                }
                self.emit(DispatchEvent::Started {
                    task_id: spec.task_id.clone(),
                    kind: spec.kind,
                    attempt,
                });
                tracing::debug!(task_id = %spec.task_id, worker = worker.name(), attempt, "attempt started");

                match timeout(self.config.attempt_timeout, worker.invoke(spec)).await {
                    Ok(Ok(record)) => DispatchOutcome::Completed(record),
                    Ok(Err(e)) => DispatchOutcome::Failed(e.to_string()),
                    Err(_) => DispatchOutcome::TimedOut,
                }
            };

            if matches!(outcome, DispatchOutcome::Completed(_)) || attempt >= max_attempts {
                return Ok((outcome, attempt));
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.retry.max_backoff);
            let reason = outcome.failure_reason().unwrap_or_default();
            tracing::warn!(
                task_id = %spec.task_id,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason = %reason,
                "attempt failed, retrying"
            );
            self.emit(DispatchEvent::Retrying {
                task_id: spec.task_id.clone(),
                attempt,
                max_attempts,
                delay,
                reason,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
