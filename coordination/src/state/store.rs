//! Record stores for finished orchestration runs
//!
//! A [`RecordStore`] owns persisted [`OrchestrationRecord`]s keyed by request
//! id. [`JsonFileStore`] writes one pretty-printed JSON file per record;
//! [`MemoryRecordStore`] keeps them in process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{OrchestrationRecord, RequestId};

/// Error type for record store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),
}

/// Result type for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a record store
pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Durable storage for orchestration records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record for its request id
    async fn put(&self, record: &OrchestrationRecord) -> StoreResult<()>;

    async fn get(&self, request_id: &str) -> StoreResult<Option<OrchestrationRecord>>;

    /// Remove a record. Returns whether it existed; deleting twice is not an error.
    async fn delete(&self, request_id: &str) -> StoreResult<bool>;

    /// Records belonging to `requester`, newest first
    async fn list_by_requester(&self, requester: &str) -> StoreResult<Vec<OrchestrationRecord>>;
}

fn newest_first(records: &mut [OrchestrationRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.request_id.cmp(&b.request_id))
    });
}

/// In-process record store
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RequestId, OrchestrationRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRecordStore {
        Arc::new(self)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &OrchestrationRecord) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.request_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, request_id: &str) -> StoreResult<Option<OrchestrationRecord>> {
        Ok(self.records.read().await.get(request_id).cloned())
    }

    async fn delete(&self, request_id: &str) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(request_id).is_some())
    }

    async fn list_by_requester(&self, requester: &str) -> StoreResult<Vec<OrchestrationRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.requester == requester)
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }
}

/// One JSON file per record under a directory
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn shared(self) -> SharedRecordStore {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, request_id: &str) -> StoreResult<PathBuf> {
        let valid = !request_id.is_empty()
            && request_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(request_id.to_string()));
        }
        Ok(self.dir.join(format!("{request_id}.json")))
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn put(&self, record: &OrchestrationRecord) -> StoreResult<()> {
        let path = self.path_for(&record.request_id)?;
        let json = serde_json::to_string_pretty(record)?;
        // Write-then-rename so readers never observe a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(request_id = %record.request_id, path = %path.display(), "Record persisted");
        Ok(())
    }

    async fn get(&self, request_id: &str) -> StoreResult<Option<OrchestrationRecord>> {
        let path = self.path_for(request_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, request_id: &str) -> StoreResult<bool> {
        let path = self.path_for(request_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_requester(&self, requester: &str) -> StoreResult<Vec<OrchestrationRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Deleted concurrently since read_dir
            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let record: OrchestrationRecord = match serde_json::from_str(&json) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                    continue;
                }
            };
            if record.requester == requester {
                records.push(record);
            }
        }
        newest_first(&mut records);
        Ok(records)
    }
}
