//! State store port - durable record storage for a run.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskId;

/// Key of one persisted record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    /// The context record (immutable).
    Context,
    /// Theories and dispatch entries (mutable).
    Ledger,
    /// A dispatched task specification (immutable).
    Task(TaskId),
    /// A worker result record (immutable).
    Result(TaskId),
    /// The aggregated artifact (immutable, written once).
    FinalArtifact,
}

impl RecordKey {
    /// Only the ledger may be upserted.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Ledger)
    }

    /// Relative path of the record, without extension.
    pub fn path(&self) -> String {
        match self {
            Self::Context => "context".to_string(),
            Self::Ledger => "ledger".to_string(),
            Self::Task(id) => format!("tasks/{id}"),
            Self::Result(id) => format!("results/{id}"),
            Self::FinalArtifact => "final-artifact".to_string(),
        }
    }

    /// Inverse of [`RecordKey::path`].
    pub fn parse(path: &str) -> Option<Self> {
        match path {
            "context" => Some(Self::Context),
            "ledger" => Some(Self::Ledger),
            "final-artifact" => Some(Self::FinalArtifact),
            other => {
                let (dir, id) = other.split_once('/')?;
                let id = TaskId::new(id).ok()?;
                match dir {
                    "tasks" => Some(Self::Task(id)),
                    "results" => Some(Self::Result(id)),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Durable, versioned record of all orchestration state.
///
/// Implementations must make `create` atomic with respect to concurrent
/// callers, and `read` must never observe a partially written record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Human-readable location of the store (directory path, `memory`).
    fn location(&self) -> String;

    /// Human-readable location of one record.
    fn record_location(&self, key: &RecordKey) -> String {
        format!("{}/{key}", self.location())
    }

    /// Write an immutable record. Fails with `AlreadyExists` if present.
    async fn create(&self, key: &RecordKey, record: &Value) -> DomainResult<()>;

    /// Replace a mutable record. Fails with `ImmutableRecord` for any key
    /// other than the ledger.
    async fn upsert(&self, key: &RecordKey, record: &Value) -> DomainResult<()>;

    /// Read a record without waiting for in-flight writers.
    ///
    /// A record that exists but cannot be decoded is reported as
    /// `StoreCorrupted`.
    async fn read(&self, key: &RecordKey) -> DomainResult<Option<Value>>;

    /// All persisted keys, sorted.
    async fn keys(&self) -> DomainResult<Vec<RecordKey>>;

    /// Move every record of the current run aside and start empty.
    ///
    /// Returns the archive location, or `None` when there was nothing to
    /// archive.
    async fn archive(&self) -> DomainResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_paths_round_trip() {
        let id = TaskId::new("inv-002-hypothesis-th-0123456789ab").unwrap();
        for key in [
            RecordKey::Context,
            RecordKey::Ledger,
            RecordKey::Task(id.clone()),
            RecordKey::Result(id),
            RecordKey::FinalArtifact,
        ] {
            assert_eq!(RecordKey::parse(&key.path()), Some(key));
        }
        assert_eq!(RecordKey::parse("results/../x"), None);
        assert_eq!(RecordKey::parse("other/x"), None);
    }

    #[test]
    fn test_only_ledger_is_mutable() {
        assert!(RecordKey::Ledger.is_mutable());
        assert!(!RecordKey::Context.is_mutable());
        assert!(!RecordKey::FinalArtifact.is_mutable());
    }
}
