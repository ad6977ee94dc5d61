use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GraphRagError, Result};

/// Small durable key-value boundary backing the SPO index and build
/// stats. sled's API is synchronous, so every call goes through
/// `spawn_blocking` to keep the tokio runtime's worker threads free.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct SledKvStore {
    db: Arc<sled::Db>,
}

impl SledKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| GraphRagError::StorageUnavailable(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || db.get(key.as_bytes()).map(|v| v.map(|iv| iv.to_vec())))
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("join error: {e}")))?
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || db.insert(key.as_bytes(), value).map(|_| ()))
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("join error: {e}")))?
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || db.remove(key.as_bytes()).map(|_| ()))
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("join error: {e}")))?
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))
    }

    async fn flush(&self) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.flush().map(|_| ()))
            .await
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("join error: {e}")))?
            .map_err(|e| GraphRagError::StorageQueryFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledKvStore::open(dir.path()).unwrap();
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
