//! In-memory state store.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::{StateKey, StateStore};
use crate::error::Result;

/// Process-local state store.
///
/// Clones share the same map. The compare and the write happen under one
/// lock, so conditional writes are atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    states: Arc<Mutex<HashMap<StateKey, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored states.
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

impl StateStore for MemoryStore {
    async fn get_state(&self, key: &StateKey) -> Result<Option<Value>> {
        Ok(self.states.lock().await.get(key).cloned())
    }

    async fn create_state(&self, key: &StateKey, state: Value) -> Result<()> {
        let mut states = self.states.lock().await;
        if states.contains_key(key) {
            return Err(key.already_exists());
        }
        states.insert(key.clone(), state);
        Ok(())
    }

    async fn update_state(&self, key: &StateKey, state: Value, expected: &Value) -> Result<()> {
        let mut states = self.states.lock().await;
        match states.get_mut(key) {
            Some(current) if current == expected => {
                *current = state;
                Ok(())
            }
            _ => Err(key.conflict()),
        }
    }

    async fn delete_state(&self, key: &StateKey, expected: &Value) -> Result<()> {
        let mut states = self.states.lock().await;
        match states.get(key) {
            Some(current) if current == expected => {
                states.remove(key);
                Ok(())
            }
            _ => Err(key.conflict()),
        }
    }
}
