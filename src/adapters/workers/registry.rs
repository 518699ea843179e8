//! Worker registry: maps worker kinds to implementations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorkerKind, WorkersConfig};
use crate::domain::ports::Worker;

use super::command::CommandWorker;

/// Kind-indexed set of workers with an optional fallback.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
    fallback: Option<Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One worker serving every kind.
    pub fn uniform(worker: Arc<dyn Worker>) -> Self {
        Self {
            workers: HashMap::new(),
            fallback: Some(worker),
        }
    }

    /// Build command workers from configuration.
    ///
    /// Keys of `workers.commands` must be worker-kind names; `default_command`
    /// serves every kind without its own entry.
    pub fn from_config(config: &WorkersConfig, scratch_dir: &Path) -> DomainResult<Self> {
        let mut registry = Self::new();
        for (name, command) in &config.commands {
            let kind = WorkerKind::from_str(name).ok_or_else(|| {
                DomainError::ValidationFailed(format!("Unknown worker kind in workers.commands: {name}"))
            })?;
            registry = registry.with_worker(
                kind,
                Arc::new(CommandWorker::new(command.clone(), scratch_dir)),
            );
        }
        if let Some(command) = &config.default_command {
            registry.fallback = Some(Arc::new(CommandWorker::new(command.clone(), scratch_dir)));
        }
        Ok(registry)
    }

    pub fn with_worker(mut self, kind: WorkerKind, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(kind, worker);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers
            .get(&kind)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.fallback.is_none()
    }

    /// Kinds among `required` that no worker serves.
    pub fn missing(&self, required: &[WorkerKind]) -> Vec<WorkerKind> {
        required
            .iter()
            .copied()
            .filter(|k| self.get(*k).is_none())
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.workers.keys().map(WorkerKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("WorkerRegistry")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.as_ref().map(|w| w.name()))
            .finish()
    }
}
