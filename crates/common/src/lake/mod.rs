//! Lake object store abstraction
//!
//! The lake holds one UTF-8 JSON blob per entity version, overwritable by
//! key. Components declare the capabilities they need (`ObjectReader`,
//! `ObjectWriter`) and are handed scoped store handles by the process that
//! wires them up, so the core stays testable without cloud credentials.

use crate::errors::{AppError, Result};
use crate::records::{EntityKind, Record, SyncCheckpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Read capability over the lake
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Fetch an object body, or None if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List all object keys under a prefix, in key order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Write capability over the lake (implies read, which overwrite checks need)
#[async_trait]
pub trait ObjectWriter: ObjectReader {
    /// Store an object body under a key, replacing any prior object
    async fn put(&self, key: &str, body: &[u8]) -> Result<()>;
}

/// Outcome of a guarded record write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written (new key, or newer than the stored version)
    Written,
    /// The stored version is at least as new; the write was rejected
    SkippedStale,
}

/// Write a record to its lake key unless a version with an equal or newer
/// `last_updated_at` is already stored. This is the idempotence and
/// last-writer-wins mechanism: re-delivery and concurrent runs converge on
/// the newest version without coordination.
pub async fn put_record_if_newer(
    store: &dyn ObjectWriter,
    record: &Record,
) -> Result<WriteOutcome> {
    let key = record.lake_key();

    if let Some(existing) = store.get(&key).await? {
        match serde_json::from_slice::<Record>(&existing) {
            Ok(stored) if stored.last_updated_at() >= record.last_updated_at() => {
                debug!(
                    key = %key,
                    stored = %stored.last_updated_at(),
                    incoming = %record.last_updated_at(),
                    "Skipping stale write"
                );
                return Ok(WriteOutcome::SkippedStale);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Replacing unparseable lake object");
            }
        }
    }

    let body = serde_json::to_vec(record)?;
    store.put(&key, &body).await?;
    Ok(WriteOutcome::Written)
}

/// Load the checkpoint for an entity type, if one has been initialized
pub async fn load_checkpoint(
    store: &dyn ObjectReader,
    kind: EntityKind,
) -> Result<Option<SyncCheckpoint>> {
    match store.get(&SyncCheckpoint::key(kind)).await? {
        Some(body) => {
            let cp = serde_json::from_slice(&body).map_err(|e| AppError::Checkpoint {
                message: format!("corrupt checkpoint for {}: {}", kind, e),
            })?;
            Ok(Some(cp))
        }
        None => Ok(None),
    }
}

/// Advance the checkpoint for an entity type, never moving it backward.
/// Returns the checkpoint actually stored.
pub async fn advance_checkpoint(
    store: &dyn ObjectWriter,
    kind: EntityKind,
    candidate: DateTime<Utc>,
    mode: &str,
) -> Result<SyncCheckpoint> {
    let last_synced_at = match load_checkpoint(store, kind).await? {
        Some(existing) if existing.last_synced_at > candidate => existing.last_synced_at,
        _ => candidate,
    };

    let cp = SyncCheckpoint {
        entity_type: kind,
        last_synced_at,
        mode: mode.to_string(),
    };
    let body = serde_json::to_vec(&cp)?;
    store.put(&SyncCheckpoint::key(kind), &body).await?;
    Ok(cp)
}

/// Filesystem-backed lake store. Objects live under `root/<key>`; writes go
/// through a temp file and rename so a crash never leaves a torn object.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|seg| seg == "..") || key.starts_with('/') {
            return Err(AppError::Lake {
                message: format!("invalid object key: {}", key),
            });
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectReader for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = relative_key(&self.root, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectWriter for FsObjectStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

/// In-memory lake store for tests and single-process setups
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectReader for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ObjectWriter for MemoryObjectStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CaseRecord;
    use chrono::TimeZone;

    fn case_with_update(updated: DateTime<Utc>) -> Record {
        Record::Case(CaseRecord {
            account_id: "111122223333".into(),
            case_id: "case-1".into(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap(),
            severity: "normal".into(),
            status: "opened".into(),
            subject: "Slow queries".into(),
            category: "performance".into(),
            service: "database".into(),
            last_updated_at: updated,
            search_context: String::new(),
        })
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryObjectStore::new();
        store.put("case/2025/01/a-1.json", b"{}").await.unwrap();
        assert_eq!(store.get("case/2025/01/a-1.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(store.get("case/2025/01/a-2.json").await.unwrap(), None);
        assert_eq!(store.list("case/").await.unwrap().len(), 1);
        assert_eq!(store.list("health/").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("case/2025/01/a-1.json", b"one").await.unwrap();
        store.put("case/2025/02/a-2.json", b"two").await.unwrap();
        store.put("health/2025/01/a-e1.json", b"ev").await.unwrap();

        assert_eq!(store.get("case/2025/01/a-1.json").await.unwrap(), Some(b"one".to_vec()));

        let case_keys = store.list("case/").await.unwrap();
        assert_eq!(case_keys, vec![
            "case/2025/01/a-1.json".to_string(),
            "case/2025/02/a-2.json".to_string(),
        ]);
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put("../escape.json", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_last_writer_wins_in_either_order() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 11, 12, 0, 0).unwrap();

        for (first, second) in [(t1, t2), (t2, t1)] {
            let store = MemoryObjectStore::new();
            put_record_if_newer(&store, &case_with_update(first)).await.unwrap();
            put_record_if_newer(&store, &case_with_update(second)).await.unwrap();

            let key = case_with_update(t1).lake_key();
            let stored: Record =
                serde_json::from_slice(&store.get(&key).await.unwrap().unwrap()).unwrap();
            assert_eq!(stored.last_updated_at(), t2);
        }
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let store = MemoryObjectStore::new();

        let record = case_with_update(t1);
        assert_eq!(
            put_record_if_newer(&store, &record).await.unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            put_record_if_newer(&store, &record).await.unwrap(),
            WriteOutcome::SkippedStale
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backward() {
        let store = MemoryObjectStore::new();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();

        let cp = advance_checkpoint(&store, EntityKind::Case, t2, "incremental").await.unwrap();
        assert_eq!(cp.last_synced_at, t2);

        // An older candidate must not rewind the high-water mark
        let cp = advance_checkpoint(&store, EntityKind::Case, t1, "incremental").await.unwrap();
        assert_eq!(cp.last_synced_at, t2);

        let loaded = load_checkpoint(&store, EntityKind::Case).await.unwrap().unwrap();
        assert_eq!(loaded.last_synced_at, t2);
    }

    #[tokio::test]
    async fn test_checkpoint_missing_is_none() {
        let store = MemoryObjectStore::new();
        assert!(load_checkpoint(&store, EntityKind::Health).await.unwrap().is_none());
    }
}
