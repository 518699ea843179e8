//! In-memory state store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{RecordKey, StateStore};

/// Volatile state store. Archived runs are kept so tests can inspect them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    records: Arc<RwLock<BTreeMap<RecordKey, Value>>>,
    archives: Arc<RwLock<Vec<BTreeMap<RecordKey, Value>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of previously archived runs, oldest first.
    pub async fn archived_runs(&self) -> Vec<BTreeMap<RecordKey, Value>> {
        self.archives.read().await.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn create(&self, key: &RecordKey, record: &Value) -> DomainResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(DomainError::AlreadyExists(key.to_string()));
        }
        records.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn upsert(&self, key: &RecordKey, record: &Value) -> DomainResult<()> {
        if !key.is_mutable() {
            return Err(DomainError::ImmutableRecord(key.to_string()));
        }
        self.records.write().await.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn read(&self, key: &RecordKey) -> DomainResult<Option<Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn keys(&self) -> DomainResult<Vec<RecordKey>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn archive(&self) -> DomainResult<Option<String>> {
        let mut records = self.records.write().await;
        if records.is_empty() {
            return Ok(None);
        }
        let mut archives = self.archives.write().await;
        archives.push(std::mem::take(&mut *records));
        Ok(Some(format!("memory#{}", archives.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = InMemoryStateStore::new();
        store.create(&RecordKey::Context, &json!(1)).await.unwrap();
        assert!(matches!(
            store.create(&RecordKey::Context, &json!(2)).await,
            Err(DomainError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.upsert(&RecordKey::Context, &json!(2)).await,
            Err(DomainError::ImmutableRecord(_))
        ));
        store.upsert(&RecordKey::Ledger, &json!(3)).await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 2);

        assert_eq!(store.archive().await.unwrap().as_deref(), Some("memory#1"));
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.archived_runs().await.len(), 1);
        assert_eq!(store.archive().await.unwrap(), None);
    }
}
