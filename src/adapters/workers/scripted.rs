//! Scripted worker for testing and dry runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResultRecord, TaskId, TaskSpec, TheoryId, WorkerKind, WorkerVerdict};
use crate::domain::ports::Worker;

use super::accept_record;

/// What the scripted worker does for one invocation.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return the record (it is validated like a real worker's output).
    Result(ResultRecord),
    /// Fail with the given reason.
    Fail(String),
    /// Report a malformed result.
    Malformed(String),
    /// Wait, then respond.
    Delay(Duration, Box<ScriptedResponse>),
    /// Never respond; only a timeout ends the invocation.
    Hang,
}

impl ScriptedResponse {
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

impl From<ResultRecord> for ScriptedResponse {
    fn from(record: ResultRecord) -> Self {
        Self::Result(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Selector {
    Task(TaskId),
    Theory(TheoryId),
    Kind(WorkerKind),
}

/// Answers each invocation from a script.
///
/// Lookup order is task id, then theory under test, then worker kind, then the
/// default. Queued responses for one selector are consumed in order; the last
/// one is sticky.
#[derive(Debug)]
pub struct ScriptedWorker {
    scripts: RwLock<HashMap<Selector, VecDeque<ScriptedResponse>>>,
    default_response: ScriptedResponse,
    invocations: RwLock<Vec<TaskSpec>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::with_default(ResultRecord::completed())
    }

    pub fn with_default(response: impl Into<ScriptedResponse>) -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            default_response: response.into(),
            invocations: RwLock::new(Vec::new()),
        }
    }

    /// Worker used by `--dry-run`: every unit completes, every theory under
    /// test ends inconclusive.
    pub fn dry_run() -> Self {
        let mut record = ResultRecord::completed().with_verdict(WorkerVerdict::Inconclusive, false);
        record.summary = Some("dry run: no worker invoked".to_string());
        Self::with_default(record)
    }

    fn push(mut self, selector: Selector, response: ScriptedResponse) -> Self {
        self.scripts
            .get_mut()
            .entry(selector)
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_task(self, task_id: TaskId, response: impl Into<ScriptedResponse>) -> Self {
        self.push(Selector::Task(task_id), response.into())
    }

    pub fn on_theory(self, theory: TheoryId, response: impl Into<ScriptedResponse>) -> Self {
        self.push(Selector::Theory(theory), response.into())
    }

    pub fn on_kind(self, kind: WorkerKind, response: impl Into<ScriptedResponse>) -> Self {
        self.push(Selector::Kind(kind), response.into())
    }

    /// Every specification received so far, in call order.
    pub async fn invocations(&self) -> Vec<TaskSpec> {
        self.invocations.read().await.clone()
    }

    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    async fn next_response(&self, spec: &TaskSpec) -> ScriptedResponse {
        let mut selectors = vec![Selector::Task(spec.task_id.clone())];
        if let Some(theory) = &spec.theory {
            selectors.push(Selector::Theory(theory.clone()));
        }
        selectors.push(Selector::Kind(spec.kind));

        let mut scripts = self.scripts.write().await;
        for selector in selectors {
            if let Some(queue) = scripts.get_mut(&selector) {
                if queue.len() > 1 {
                    if let Some(response) = queue.pop_front() {
                        return response;
                    }
                }
                if let Some(response) = queue.front() {
                    return response.clone();
                }
            }
        }
        self.default_response.clone()
    }
}

impl Default for ScriptedWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn invoke(&self, spec: &TaskSpec) -> DomainResult<ResultRecord> {
        self.invocations.write().await.push(spec.clone());
        let mut response = self.next_response(spec).await;
        loop {
            match response {
                ScriptedResponse::Result(record) => return accept_record(record),
                ScriptedResponse::Fail(reason) => return Err(DomainError::WorkerFailed(reason)),
                ScriptedResponse::Malformed(reason) => {
                    return Err(DomainError::MalformedResult(reason));
                }
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                ScriptedResponse::Hang => return std::future::pending().await,
            }
        }
    }
}
