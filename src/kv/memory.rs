use super::{KeyValueOp, KeyValueStore};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Key-value store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    state: RwLock<State>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self.state.read().await.strings.get(key).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> DbResult<HashMap<String, String>> {
        Ok(self
            .state
            .read()
            .await
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, ops: Vec<KeyValueOp>) -> DbResult<()> {
        let mut state = self.state.write().await;

        // The batch runs against a copy so a failing op leaves no trace.
        let mut next = (*state).clone();
        for op in ops {
            next.apply(op)?;
        }
        *state = next;
        Ok(())
    }
}

impl State {
    /// Type conflicts are judged against the writes earlier in the batch.
    fn apply(&mut self, op: KeyValueOp) -> DbResult<()> {
        match op {
            KeyValueOp::Set { key, value } => {
                if self.hashes.contains_key(&key) {
                    return Err(wrong_type(&key));
                }
                self.strings.insert(key, value);
            }
            KeyValueOp::Delete { key } => {
                self.strings.remove(&key);
                self.hashes.remove(&key);
            }
            KeyValueOp::HashSet { key, field, value } => {
                if self.strings.contains_key(&key) {
                    return Err(wrong_type(&key));
                }
                self.hashes.entry(key).or_default().insert(field, value);
            }
            KeyValueOp::HashDelete { key, field } => {
                if self.strings.contains_key(&key) {
                    return Err(wrong_type(&key));
                }
                if let Some(hash) = self.hashes.get_mut(&key) {
                    hash.remove(&field);
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

fn wrong_type(key: &str) -> DbError {
    DbError::key_value(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}
