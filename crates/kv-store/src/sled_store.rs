//! File-backed store on top of sled
//!
//! One sled database per bot instance, opened at
//! `<data-dir>/<database>.sled`. Values are stored as JSON bytes and every
//! mutation is flushed before returning.

use crate::{KeyValueStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
}

impl SledStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), keys = db.len(), "Opened key-value store");
        Ok(Self { db: Arc::new(db) })
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Value, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush_async().await?;
        debug!(key, "Stored value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.db.remove(key.as_bytes())?.is_some();
        if existed {
            self.db.flush_async().await?;
            debug!(key, "Deleted value");
        }
        Ok(existed)
    }
}
