//! Expiring key-value persistence for single-engine job records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconbench_schemas::JobRecord;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How long a job record survives after its last write.
pub const RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job not found")]
    NotFound(String),
}

/// Minimal string store with per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Current value of `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at: DateTime<Utc>,
    value: String,
}

/// One JSON envelope per key inside a directory; survives restarts.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding `key`. Every character outside `[A-Za-z0-9_-]` maps to `_`,
    /// so keys can never escape the directory.
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        let envelope: Envelope =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })?;

        if envelope.expires_at <= Utc::now() {
            debug!(key, "Record expired");
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(key, error = %e, "Failed to remove expired record");
            }
            return Ok(None);
        }

        Ok(Some(envelope.value))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("invalid expiry: {e}")))?;
        let envelope = Envelope {
            expires_at: Utc::now() + ttl,
            value,
        };
        let encoded = serde_json::to_string(&envelope).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // write-then-rename keeps readers from seeing a half-written record
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Typed access to [`JobRecord`]s stored under `job:<id>`.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            ttl: RECORD_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(job_id: &str) -> String {
        format!("job:{job_id}")
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let key = Self::key(job_id);
        let raw = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { key, source })
    }

    pub async fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let key = Self::key(&record.job_id);
        let encoded = serde_json::to_string(record).map_err(|source| StoreError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.backend.set_ex(&key, encoded, self.ttl).await
    }

    /// Re-read the record, apply `change` and write the whole record back.
    pub async fn update<F>(&self, job_id: &str, change: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self.get(job_id).await?;
        change(&mut record);
        self.put(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconbench_schemas::LegacyStatus;
    use rstest::rstest;

    fn record(job_id: &str) -> JobRecord {
        serde_json::from_value(serde_json::json!({
            "job_id": job_id,
            "method": "colmap",
            "status": "queued",
            "progress": 0.0,
            "start_time": 1700000000.0,
            "input_dir": "/data/uploads/u1",
            "parameters": {"quality": "high"}
        }))
        .unwrap()
    }

    fn memory() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    fn file(dir: &tempfile::TempDir) -> Arc<dyn KeyValueStore> {
        Arc::new(FileStore::new(dir.path().join("records")))
    }

    #[rstest]
    #[case::memory(false)]
    #[case::file(true)]
    #[tokio::test]
    async fn update_preserves_unrelated_fields(#[case] on_disk: bool) {
        let dir = tempfile::tempdir().unwrap();
        let backend = if on_disk { file(&dir) } else { memory() };
        let store = JobStore::new(backend);

        store.put(&record("u1_colmap_1")).await.unwrap();
        let updated = store
            .update("u1_colmap_1", |r| r.transition(LegacyStatus::Running))
            .await
            .unwrap();

        assert_eq!(updated.status, LegacyStatus::Running);
        assert_eq!(updated.progress, 0.1);

        let reread = store.get("u1_colmap_1").await.unwrap();
        assert_eq!(reread, updated);
        assert_eq!(reread.input_dir, "/data/uploads/u1");
        assert_eq!(reread.parameters["quality"], "high");
    }

    #[rstest]
    #[case::memory(false)]
    #[case::file(true)]
    #[tokio::test]
    async fn expired_records_read_as_missing(#[case] on_disk: bool) {
        let dir = tempfile::tempdir().unwrap();
        let backend = if on_disk { file(&dir) } else { memory() };
        let store = JobStore::new(backend).with_ttl(Duration::ZERO);

        store.put(&record("gone")).await.unwrap();
        let err = store.get("gone").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn update_of_missing_record_fails() {
        let store = JobStore::new(memory());
        let err = store.update("nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn file_keys_cannot_escape_directory() {
        let store = FileStore::new("/var/lib/reconbench");
        assert_eq!(
            store.path_for("job:../../etc/passwd"),
            PathBuf::from("/var/lib/reconbench/job_______etc_passwd.json")
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        std::fs::write(dir.path().join("job_bad.json"), "not json").unwrap();

        let err = store.get("job:bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn unwritable_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = FileStore::new(blocker.join("records"));

        let err = store
            .set_ex("job:x", "{}".to_string(), RECORD_TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
