//! Directory-backed state store.
//!
//! Layout under the run directory:
//!
//! ```text
//! context.json
//! ledger.json
//! tasks/<task-id>.json
//! results/<task-id>.json
//! final-artifact.json
//! ```
//!
//! Every write goes to a temp file first. Immutable records are published with
//! a hard link, which fails if the target exists, so two racing `create` calls
//! cannot both succeed. The ledger is published with a rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{RecordKey, StateStore};

const RECORD_EXT: &str = "json";
const NESTED_DIRS: [&str; 2] = ["tasks", "results"];

/// State store persisting each record as one JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> DomainResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a record file.
    pub fn record_path(&self, key: &RecordKey) -> PathBuf {
        self.root.join(format!("{}.{RECORD_EXT}", key.path()))
    }

    async fn write_temp(&self, target: &Path, record: &Value) -> DomainResult<PathBuf> {
        let parent = target.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await?;

        let mut bytes = serde_json::to_vec_pretty(record)?;
        bytes.push(b'\n');

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        Ok(tmp)
    }

    async fn collect_keys(&self, dir: &Path, prefix: Option<&str>, out: &mut Vec<RecordKey>) -> DomainResult<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{RECORD_EXT}")) else {
                continue;
            };
            let path = match prefix {
                Some(p) => format!("{p}/{stem}"),
                None => stem.to_string(),
            };
            if let Some(key) = RecordKey::parse(&path) {
                out.push(key);
            }
        }
        Ok(())
    }

    async fn archive_target(&self) -> DomainResult<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let name = self
            .root
            .file_name()
            .map_or_else(|| "run".to_string(), |n| n.to_string_lossy().to_string());
        let base = self.root.with_file_name(format!("{name}.{stamp}"));
        let mut candidate = base.clone();
        let mut n = 1;
        while tokio::fs::try_exists(&candidate).await? {
            candidate = PathBuf::from(format!("{}.{n}", base.display()));
            n += 1;
        }
        Ok(candidate)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn record_location(&self, key: &RecordKey) -> String {
        self.record_path(key).display().to_string()
    }

    async fn create(&self, key: &RecordKey, record: &Value) -> DomainResult<()> {
        let target = self.record_path(key);
        let tmp = self.write_temp(&target, record).await?;

        let published = tokio::fs::hard_link(&tmp, &target).await;
        let cleanup = tokio::fs::remove_file(&tmp).await;

        match published {
            Ok(()) => {
                cleanup?;
                tracing::debug!(key = %key, "record created");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(DomainError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, key: &RecordKey, record: &Value) -> DomainResult<()> {
        if !key.is_mutable() {
            return Err(DomainError::ImmutableRecord(key.to_string()));
        }
        let target = self.record_path(key);
        let tmp = self.write_temp(&target, record).await?;
        tokio::fs::rename(&tmp, &target).await?;
        tracing::trace!(key = %key, "record upserted");
        Ok(())
    }

    async fn read(&self, key: &RecordKey) -> DomainResult<Option<Value>> {
        let path = self.record_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DomainError::StoreCorrupted(format!("{key}: {e}")))
    }

    async fn keys(&self) -> DomainResult<Vec<RecordKey>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, None, &mut keys).await?;
        for dir in NESTED_DIRS {
            self.collect_keys(&self.root.join(dir), Some(dir), &mut keys)
                .await?;
        }
        keys.sort();
        Ok(keys)
    }

    async fn archive(&self) -> DomainResult<Option<String>> {
        if self.keys().await?.is_empty() {
            return Ok(None);
        }
        let target = self.archive_target().await?;
        tokio::fs::rename(&self.root, &target).await?;
        tokio::fs::create_dir_all(&self.root).await?;
        tracing::info!(archive = %target.display(), "archived previous run");
        Ok(Some(target.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskId;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, FileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("run")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_is_write_once() {
        let (_dir, store) = store().await;
        store.create(&RecordKey::Context, &json!({"a": 1})).await.unwrap();
        let err = store
            .create(&RecordKey::Context, &json!({"a": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyExists(_)));
        let value = store.read(&RecordKey::Context).await.unwrap().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_upsert_only_for_ledger() {
        let (_dir, store) = store().await;
        store.upsert(&RecordKey::Ledger, &json!({"v": 1})).await.unwrap();
        store.upsert(&RecordKey::Ledger, &json!({"v": 2})).await.unwrap();
        assert_eq!(
            store.read(&RecordKey::Ledger).await.unwrap(),
            Some(json!({"v": 2}))
        );
        let err = store
            .upsert(&RecordKey::FinalArtifact, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ImmutableRecord(_)));
    }

    #[tokio::test]
    async fn test_keys_and_no_temp_leftovers() {
        let (_dir, store) = store().await;
        let id = TaskId::new("analysis.change-analysis.FILE-1").unwrap();
        store.create(&RecordKey::Context, &json!({})).await.unwrap();
        store.create(&RecordKey::Task(id.clone()), &json!({})).await.unwrap();
        store.create(&RecordKey::Result(id.clone()), &json!({})).await.unwrap();
        let keys = store.keys().await.unwrap();
        assert_eq!(
            keys,
            vec![
                RecordKey::Context,
                RecordKey::Task(id.clone()),
                RecordKey::Result(id)
            ]
        );
        let mut leftovers = std::fs::read_dir(store.root().join("results")).unwrap();
        assert!(leftovers.all(|e| !e.unwrap().file_name().to_string_lossy().starts_with('.')));
    }

    #[tokio::test]
    async fn test_corrupted_record_is_reported() {
        let (_dir, store) = store().await;
        std::fs::write(store.record_path(&RecordKey::Ledger), b"{not json").unwrap();
        let err = store.read(&RecordKey::Ledger).await.unwrap_err();
        assert!(matches!(err, DomainError::StoreCorrupted(_)));
    }

    #[tokio::test]
    async fn test_archive_renames_and_empties() {
        let (_dir, store) = store().await;
        assert_eq!(store.archive().await.unwrap(), None);

        store.create(&RecordKey::FinalArtifact, &json!({"run": 1})).await.unwrap();
        let first = store.archive().await.unwrap().unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert!(Path::new(&first).join("final-artifact.json").exists());

        store.create(&RecordKey::FinalArtifact, &json!({"run": 2})).await.unwrap();
        let second = store.archive().await.unwrap().unwrap();
        assert_ne!(first, second);
        assert!(Path::new(&second).join("final-artifact.json").exists());
    }
}
