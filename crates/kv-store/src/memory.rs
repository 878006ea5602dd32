//! In-process store, used by tests and `--memory-store` runs

use crate::{KeyValueStore, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of all keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        store.set("123", json!("0xabc")).await.unwrap();
        assert_eq!(store.get("123").await.unwrap(), Some(json!("0xabc")));
        assert_eq!(store.len(), 1);

        assert!(store.delete("123").await.unwrap());
        assert!(!store.delete("123").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_string_ignores_records() {
        let store = MemoryStore::new();
        store.set("name", json!("alice")).await.unwrap();
        store
            .set("record", json!({ "reaction": "👍" }))
            .await
            .unwrap();

        assert_eq!(store.get_string("name").await.unwrap().as_deref(), Some("alice"));
        assert!(store.get_string("record").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = MemoryStore::new();
        store.set("b", json!(1)).await.unwrap();
        store.set("a", json!(2)).await.unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
