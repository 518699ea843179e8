//! Single-writer access to the run ledger.
//!
//! Every ledger mutation goes through [`RunState::mutate`], which holds one
//! async mutex for the whole read-modify-persist cycle. A mutation is applied
//! to a copy and only becomes visible after it was persisted, so a failed
//! write leaves the in-memory ledger untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ContextRecord, DispatchEntry, DispatchOutcome, DispatchState, Ledger, ResultRecord, RunMode,
    TaskId, TaskSpec,
};
use crate::domain::ports::{RecordKey, StateStore};

/// Read and decode a record. Decode failures are store corruption.
pub async fn read_record<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &RecordKey,
) -> DomainResult<Option<T>> {
    match store.read(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DomainError::StoreCorrupted(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

/// Encode and create an immutable record.
pub async fn create_record<T: Serialize>(
    store: &dyn StateStore,
    key: &RecordKey,
    record: &T,
) -> DomainResult<()> {
    store.create(key, &serde_json::to_value(record)?).await
}

/// Whether a new dispatch may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A ledger entry was written with this sequence number.
    Admitted { seq: u32 },
    /// The task id already has a ledger entry.
    Duplicate,
    /// The dispatch ceiling is reached.
    BudgetExhausted,
}

/// What [`RunState::recover_interrupted`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries whose result record was found and adopted.
    pub recovered: Vec<TaskId>,
    /// Entries without a result, now failed.
    pub interrupted: Vec<TaskId>,
}

/// Owner of the run ledger.
pub struct RunState {
    store: Arc<dyn StateStore>,
    ledger: Mutex<Ledger>,
}

impl RunState {
    /// Start a new ledger. Fails with `AlreadyExists` if one is persisted.
    pub async fn begin(
        store: Arc<dyn StateStore>,
        mode: RunMode,
        max_dispatches: u32,
    ) -> DomainResult<Self> {
        let ledger = Ledger::new(mode, max_dispatches);
        create_record(store.as_ref(), &RecordKey::Ledger, &ledger).await?;
        tracing::info!(run_id = %ledger.run_id, mode = %mode, max_dispatches, "run started");
        Ok(Self {
            store,
            ledger: Mutex::new(ledger),
        })
    }

    /// Rebuild from the persisted ledger.
    pub async fn load(store: Arc<dyn StateStore>) -> DomainResult<Self> {
        let ledger: Ledger = read_record(store.as_ref(), &RecordKey::Ledger)
            .await?
            .ok_or_else(|| DomainError::RecordMissing(RecordKey::Ledger.to_string()))?;
        tracing::info!(
            run_id = %ledger.run_id,
            dispatches = ledger.dispatch_count(),
            theories = ledger.theories.len(),
            "run state loaded"
        );
        Ok(Self {
            store,
            ledger: Mutex::new(ledger),
        })
    }

    /// Load the persisted ledger if there is one, otherwise begin a new run.
    ///
    /// Returns whether an existing run was resumed. Resuming a run started in
    /// another mode is rejected.
    pub async fn open(
        store: Arc<dyn StateStore>,
        mode: RunMode,
        max_dispatches: u32,
    ) -> DomainResult<(Self, bool)> {
        if store.read(&RecordKey::Ledger).await?.is_none() {
            return Ok((Self::begin(store, mode, max_dispatches).await?, false));
        }
        let state = Self::load(store).await?;
        let ledger = state.snapshot().await;
        if ledger.mode != mode {
            return Err(DomainError::ValidationFailed(format!(
                "run in {} was started in {} mode, cannot resume it in {} mode",
                state.store.location(),
                ledger.mode,
                mode
            )));
        }
        if ledger.max_dispatches != max_dispatches {
            tracing::warn!(
                persisted = ledger.max_dispatches,
                requested = max_dispatches,
                "keeping the dispatch ceiling of the resumed run"
            );
        }
        Ok((state, true))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Copy of the current ledger.
    pub async fn snapshot(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }

    /// Apply `f` to the ledger and persist the result atomically.
    pub async fn mutate<F, R>(&self, f: F) -> DomainResult<R>
    where
        F: FnOnce(&mut Ledger) -> DomainResult<R>,
    {
        let mut guard = self.ledger.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if next != *guard {
            self.store
                .upsert(&RecordKey::Ledger, &serde_json::to_value(&next)?)
                .await?;
            *guard = next;
        }
        Ok(out)
    }

    /// Charge one dispatch against the budget and record its task spec.
    ///
    /// The budget check, the duplicate check and the ledger write happen under
    /// one lock, so concurrent callers can never exceed the ceiling.
    pub async fn begin_dispatch(&self, spec: &TaskSpec) -> DomainResult<Admission> {
        let mut guard = self.ledger.lock().await;
        if guard.dispatches.contains_key(&spec.task_id) {
            return Ok(Admission::Duplicate);
        }
        if guard.budget_remaining() == 0 {
            return Ok(Admission::BudgetExhausted);
        }

        match create_record(self.store.as_ref(), &RecordKey::Task(spec.task_id.clone()), spec).await {
            Ok(()) => {}
            Err(DomainError::AlreadyExists(_)) => {
                tracing::debug!(task_id = %spec.task_id, "task record survived an earlier attempt");
            }
            Err(e) => return Err(e),
        }

        let mut next = guard.clone();
        let seq = next.next_seq();
        let entry = DispatchEntry::new(
            spec.task_id.clone(),
            spec.kind,
            spec.phase.clone(),
            seq,
            spec.theory.clone(),
        );
        next.dispatches.insert(spec.task_id.clone(), entry);
        self.store
            .upsert(&RecordKey::Ledger, &serde_json::to_value(&next)?)
            .await?;
        *guard = next;

        tracing::debug!(task_id = %spec.task_id, seq, kind = %spec.kind, "dispatch admitted");
        Ok(Admission::Admitted { seq })
    }

    /// Record the start of one attempt.
    pub async fn mark_running(&self, task_id: &TaskId) -> DomainResult<()> {
        self.mutate(|ledger| {
            let entry = entry_mut(ledger, task_id)?;
            if entry.state == DispatchState::Pending {
                transition(entry, DispatchState::Running)?;
            }
            entry.attempts += 1;
            Ok(())
        })
        .await
    }

    /// Record the terminal outcome of a dispatch.
    ///
    /// Returns `false` when the entry was already terminal; the late outcome
    /// is discarded.
    pub async fn finish_dispatch(
        &self,
        task_id: &TaskId,
        outcome: &DispatchOutcome,
    ) -> DomainResult<bool> {
        {
            let ledger = self.ledger.lock().await;
            let entry = ledger
                .dispatches
                .get(task_id)
                .ok_or_else(|| DomainError::RecordMissing(format!("dispatch {task_id}")))?;
            if entry.is_terminal() {
                tracing::warn!(task_id = %task_id, state = entry.state.as_str(), "late outcome discarded");
                return Ok(false);
            }
        }

        let result_key = RecordKey::Result(task_id.clone());
        if let DispatchOutcome::Completed(record) = outcome {
            match create_record(self.store.as_ref(), &result_key, record).await {
                Ok(()) => {}
                Err(DomainError::AlreadyExists(_)) => {
                    tracing::warn!(task_id = %task_id, "result record already present, keeping the first");
                }
                Err(e) => return Err(e),
            }
        }

        self.mutate(|ledger| {
            let entry = entry_mut(ledger, task_id)?;
            if entry.is_terminal() {
                return Ok(false);
            }
            if entry.state == DispatchState::Pending && outcome.state() != DispatchState::Failed {
                transition(entry, DispatchState::Running)?;
            }
            transition(entry, outcome.state())?;
            entry.failure = outcome.failure_reason();
            if outcome.result().is_some() {
                entry.result_key = Some(result_key.to_string());
            }
            Ok(true)
        })
        .await
    }

    /// Settle entries left pending or running by an interrupted process.
    ///
    /// An entry whose result record exists is completed with it; any other is
    /// failed as interrupted. Completed entries must have their result record.
    pub async fn recover_interrupted(&self) -> DomainResult<RecoveryReport> {
        let ledger = self.snapshot().await;
        let mut report = RecoveryReport::default();

        for entry in ledger.dispatches.values() {
            let key = RecordKey::Result(entry.task_id.clone());
            match entry.state {
                DispatchState::Completed => {
                    if self.store.read(&key).await?.is_none() {
                        return Err(DomainError::StoreCorrupted(format!(
                            "dispatch {} is completed but {key} is missing",
                            entry.task_id
                        )));
                    }
                }
                DispatchState::Pending | DispatchState::Running => {
                    let outcome = match read_record::<ResultRecord>(self.store.as_ref(), &key).await? {
                        Some(record) => {
                            report.recovered.push(entry.task_id.clone());
                            DispatchOutcome::Completed(record)
                        }
                        None => {
                            report.interrupted.push(entry.task_id.clone());
                            DispatchOutcome::Failed("interrupted".to_string())
                        }
                    };
                    self.finish_dispatch(&entry.task_id, &outcome).await?;
                }
                DispatchState::Failed | DispatchState::TimedOut => {}
            }
        }

        if !report.recovered.is_empty() || !report.interrupted.is_empty() {
            tracing::warn!(
                recovered = report.recovered.len(),
                interrupted = report.interrupted.len(),
                "settled dispatches of an interrupted run"
            );
        }
        Ok(report)
    }

    /// Result record of a completed dispatch.
    pub async fn result(&self, task_id: &TaskId) -> DomainResult<ResultRecord> {
        read_record(self.store.as_ref(), &RecordKey::Result(task_id.clone()))
            .await?
            .ok_or_else(|| DomainError::StoreCorrupted(format!("result for {task_id} is missing")))
    }

    /// Result records of every completed dispatch.
    pub async fn results(&self) -> DomainResult<BTreeMap<TaskId, ResultRecord>> {
        let ledger = self.snapshot().await;
        let mut results = BTreeMap::new();
        for entry in ledger.dispatches.values() {
            if entry.state == DispatchState::Completed {
                results.insert(entry.task_id.clone(), self.result(&entry.task_id).await?);
            }
        }
        Ok(results)
    }

    pub async fn context(&self) -> DomainResult<Option<ContextRecord>> {
        read_record(self.store.as_ref(), &RecordKey::Context).await
    }
}

fn entry_mut<'a>(ledger: &'a mut Ledger, task_id: &TaskId) -> DomainResult<&'a mut DispatchEntry> {
    ledger
        .dispatches
        .get_mut(task_id)
        .ok_or_else(|| DomainError::RecordMissing(format!("dispatch {task_id}")))
}

fn transition(entry: &mut DispatchEntry, to: DispatchState) -> DomainResult<()> {
    let from = entry.state;
    entry
        .transition_to(to)
        .map_err(|reason| DomainError::InvalidStateTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            reason,
        })
}
