//! Storage abstraction for engine state.
//!
//! Every engine keeps one JSON document per entity id and writes it back with
//! an optimistic compare: a write succeeds only if the stored document is
//! still the one the engine read.
//!
//! - [`MemoryStore`] — process-local map, for tests and single-process runs
//! - [`CachedStore`] — write-through LRU cache in front of any store
//! - [`PgStore`] — PostgreSQL storage (requires `postgres` feature)

mod cached;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::fmt;
use std::future::Future;

use serde_json::Value;

pub use cached::CachedStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::error::Result;

/// Address of one state document: the owning engine and the entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    namespace: &'static str,
    id: String,
}

impl StateKey {
    pub fn new(namespace: &'static str, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn conflict(&self) -> crate::Error {
        crate::Error::StateConflict {
            namespace: self.namespace,
            id: self.id.clone(),
        }
    }

    pub(crate) fn already_exists(&self) -> crate::Error {
        crate::Error::StateAlreadyExists {
            namespace: self.namespace,
            id: self.id.clone(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Storage backend for engine state.
///
/// Reads and conditional writes for one key are the only synchronization
/// point between engine instances: a failed compare surfaces as
/// [`Error::StateConflict`](crate::Error::StateConflict) and must never be
/// retried as a blind overwrite.
pub trait StateStore: Send + Sync + Clone + 'static {
    /// Load the state stored under `key`, if any.
    fn get_state(&self, key: &StateKey) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Store a new state.
    ///
    /// Fails with `StateAlreadyExists` if `key` already holds a state.
    fn create_state(&self, key: &StateKey, state: Value)
    -> impl Future<Output = Result<()>> + Send;

    /// Replace the state under `key` if it still equals `expected`.
    ///
    /// Fails with `StateConflict` otherwise, including when the key is gone.
    fn update_state(
        &self,
        key: &StateKey,
        state: Value,
        expected: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the state under `key` if it still equals `expected`.
    ///
    /// Fails with `StateConflict` otherwise.
    fn delete_state(
        &self,
        key: &StateKey,
        expected: &Value,
    ) -> impl Future<Output = Result<()>> + Send;
}
