//! Write-through LRU cache over a state store.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{StateKey, StateStore};
use crate::error::Result;

/// Caches recently used states in front of a slower store.
///
/// Reads hit the cache first. Writes go to the inner store and, once it
/// accepts them, to the cache. A write rejected by the inner store evicts the
/// key, so the next read sees what another instance wrote.
///
/// Only sound when this instance is the single writer for the keys it caches,
/// which the runtime's per-entity partitioning provides.
#[derive(Debug, Clone)]
pub struct CachedStore<S> {
    inner: S,
    cache: Arc<Mutex<LruCache<StateKey, Value>>>,
}

impl<S: StateStore> CachedStore<S> {
    /// Wrap `inner`, keeping at most `capacity` states.
    pub fn new(inner: S, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn evict(&self, key: &StateKey) {
        if self.cache.lock().pop(key).is_some() {
            debug!(%key, "Evicted cached state after rejected write");
        }
    }

    fn remember<T>(&self, key: &StateKey, state: Option<Value>, result: Result<T>) -> Result<T> {
        match (&result, state) {
            (Ok(_), Some(state)) => {
                self.cache.lock().put(key.clone(), state);
            }
            (Ok(_), None) => {
                self.cache.lock().pop(key);
            }
            (Err(_), _) => self.evict(key),
        }
        result
    }
}

impl<S: StateStore> StateStore for CachedStore<S> {
    async fn get_state(&self, key: &StateKey) -> Result<Option<Value>> {
        if let Some(state) = self.cache.lock().get(key).cloned() {
            return Ok(Some(state));
        }

        let state = self.inner.get_state(key).await?;
        if let Some(state) = &state {
            self.cache.lock().put(key.clone(), state.clone());
        }
        Ok(state)
    }

    async fn create_state(&self, key: &StateKey, state: Value) -> Result<()> {
        let result = self.inner.create_state(key, state.clone()).await;
        self.remember(key, Some(state), result)
    }

    async fn update_state(&self, key: &StateKey, state: Value, expected: &Value) -> Result<()> {
        let result = self.inner.update_state(key, state.clone(), expected).await;
        self.remember(key, Some(state), result)
    }

    async fn delete_state(&self, key: &StateKey, expected: &Value) -> Result<()> {
        let result = self.inner.delete_state(key, expected).await;
        self.remember(key, None, result)
    }
}
