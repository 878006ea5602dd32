//! Multi-key writes with compensation
//!
//! The backing stores have no transactions. A [`WriteBatch`] applies its
//! operations one by one, remembering the previous value of every key it
//! touched; if an operation fails, the keys already written are restored in
//! reverse order. A failed restore is logged and reported, it is never
//! retried.

use crate::{KeyValueStore, StoreError};
use serde_json::Value;
use tracing::{error, warn};

#[derive(Clone, Debug)]
enum BatchOp {
    Set(String, Value),
    Delete(String),
}

impl BatchOp {
    fn key(&self) -> &str {
        match self {
            BatchOp::Set(key, _) | BatchOp::Delete(key) => key,
        }
    }
}

/// Ordered list of writes committed as one logical unit
pub struct WriteBatch<'a> {
    store: &'a dyn KeyValueStore,
    ops: Vec<BatchOp>,
}

/// Failure while committing a batch
#[derive(Debug, thiserror::Error)]
#[error("Batch write failed at key {failed_key} after {applied} applied operation(s): {source}")]
pub struct BatchError {
    /// Key whose write failed
    pub failed_key: String,
    /// Number of operations that had been applied before the failure
    pub applied: usize,
    /// Whether every applied operation was undone
    pub rolled_back: bool,
    #[source]
    pub source: StoreError,
}

impl BatchError {
    /// True when some, but not all, writes reached the store and were left there
    pub fn is_partial(&self) -> bool {
        self.applied > 0 && !self.rolled_back
    }
}

impl<'a> WriteBatch<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ops.push(BatchOp::Set(key.into(), value));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    /// Apply every operation in order, undoing applied ones on failure
    pub async fn commit(self) -> Result<(), BatchError> {
        let mut undo: Vec<(String, Option<Value>)> = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            let key = op.key().to_string();
            let result = match self.store.get(&key).await {
                Ok(previous) => {
                    let applied = match op {
                        BatchOp::Set(_, value) => self.store.set(&key, value.clone()).await,
                        BatchOp::Delete(_) => self.store.delete(&key).await.map(|_| ()),
                    };
                    applied.map(|_| previous)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(previous) => undo.push((key, previous)),
                Err(source) => {
                    let applied = undo.len();
                    warn!(
                        key = %key,
                        applied,
                        error = %source,
                        "Batch write failed, rolling back"
                    );
                    let rolled_back = Self::rollback(self.store, undo).await;
                    return Err(BatchError {
                        failed_key: key,
                        applied,
                        rolled_back,
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    async fn rollback(store: &dyn KeyValueStore, undo: Vec<(String, Option<Value>)>) -> bool {
        let mut clean = true;
        for (key, previous) in undo.into_iter().rev() {
            let restored = match previous {
                Some(value) => store.set(&key, value).await,
                None => store.delete(&key).await.map(|_| ()),
            };
            if let Err(e) = restored {
                error!(key = %key, error = %e, "Rollback failed, store left inconsistent");
                clean = false;
            }
        }
        clean
    }
}
