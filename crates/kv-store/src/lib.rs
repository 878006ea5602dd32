//! Key-value persistence for the DAO bot
//!
//! Everything the bot remembers lives in a flat string-keyed store:
//! - `userId -> address` and `address -> userId` registration pairs
//! - `{userId}_lastReactionOnMessage_{messageId}` vote records
//!
//! Values are JSON (`serde_json::Value`): plain strings for registrations,
//! small objects for vote records. The store offers no transactions; writes
//! spanning several keys go through [`WriteBatch`], which compensates on
//! failure.

pub mod batch;
pub mod memory;
pub mod sled_store;

pub use batch::{BatchError, WriteBatch};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use serde_json::Value;

/// Backend-agnostic key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Read a value that is expected to be a string.
    ///
    /// Non-string values are reported as `None` rather than an error so that
    /// a key reused for a record never breaks a string lookup.
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}
