//! Key-value datastore boundary.
//!
//! The migration runner only needs a small slice of a key-value store: plain
//! reads, whole-hash reads, and an atomic batch of writes (MULTI/EXEC style).
//! Production stores implement [`KeyValueStore`]; [`MemoryKeyValueStore`] is
//! an in-process implementation.

mod memory;

pub use memory::MemoryKeyValueStore;

use crate::error::DbResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A single buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValueOp {
    Set { key: String, value: String },
    Delete { key: String },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    HashDelete { key: String, field: String },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// All fields of a hash; empty when the hash does not exist.
    async fn hash_get_all(&self, key: &str) -> DbResult<HashMap<String, String>>;

    /// Apply every operation or none of them.
    async fn apply(&self, ops: Vec<KeyValueOp>) -> DbResult<()>;
}

/// Writes buffered against a store, applied together on commit.
pub struct KeyValueTransaction {
    store: Arc<dyn KeyValueStore>,
    ops: Vec<KeyValueOp>,
}

impl KeyValueTransaction {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(KeyValueOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(KeyValueOp::Delete { key: key.into() });
        self
    }

    pub fn hash_set(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.ops.push(KeyValueOp::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn hash_delete(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.ops.push(KeyValueOp::HashDelete {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    /// Read committed state. Buffered writes are not visible.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        self.store.get(key).await
    }

    pub fn pending(&self) -> &[KeyValueOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the buffered writes atomically.
    pub async fn commit(self) -> DbResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.store.apply(self.ops).await
    }

    /// Drop the buffered writes.
    pub fn discard(self) -> usize {
        self.ops.len()
    }
}

impl std::fmt::Debug for KeyValueTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueTransaction")
            .field("ops", &self.ops)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_writes_invisible_until_commit() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let mut tx = KeyValueTransaction::new(store.clone());

        tx.set("greeting", "hello").hash_set("h", "f", "v");
        assert_eq!(tx.get("greeting").await.unwrap(), None);
        assert_eq!(tx.pending().len(), 2);

        tx.commit().await.unwrap();
        assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(
            store.hash_get_all("h").await.unwrap().get("f").map(String::as_str),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_discard_applies_nothing() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let mut tx = KeyValueTransaction::new(store.clone());
        tx.set("k", "v");

        assert_eq!(tx.discard(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
