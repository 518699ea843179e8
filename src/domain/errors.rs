//! Domain errors for the Sleuth orchestrator.

use thiserror::Error;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Domain-level errors that can occur while orchestrating a run.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Record {0} is immutable and cannot be upserted")]
    ImmutableRecord(String),

    #[error("Required record missing: {0}")]
    RecordMissing(String),

    #[error("State store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("Context preparation failed: {0}")]
    ContextPreparation(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Phase dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl DomainError {
    /// Whether this error must abort the run before any artifact is written.
    ///
    /// Worker failures and malformed results are recovered locally and recorded
    /// as ledger state; only store damage and context-preparation failures are
    /// fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::WorkerFailed(_) | Self::MalformedResult(_))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_formatting() {
        let err = DomainError::DependencyCycle(vec![
            "context".to_string(),
            "analysis".to_string(),
            "context".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Phase dependency cycle detected: context -> analysis -> context"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!DomainError::WorkerFailed("boom".into()).is_fatal());
        assert!(!DomainError::MalformedResult("bad".into()).is_fatal());
        assert!(DomainError::StoreCorrupted("ledger".into()).is_fatal());
        assert!(DomainError::ContextPreparation("no diff".into()).is_fatal());
    }
}
