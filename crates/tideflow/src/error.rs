//! Error types for tideflow.

use thiserror::Error;

use crate::capture::CaptureError;
use crate::worker::TaskFailure;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tideflow operations.
///
/// Protocol inconsistencies (duplicate starts, entity mismatches, stale
/// decisions) are not errors: engines log and discard them. Only
/// infrastructure failures and programming mistakes surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize a message, state, or payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored state could not be decoded into the engine's state type.
    ///
    /// This typically indicates a mismatch between the persisted format and
    /// the current state definition.
    #[error("failed to deserialize {namespace} state for {id}: {source}")]
    StateDeserialization {
        /// The store namespace (engine name).
        namespace: &'static str,
        /// The entity id.
        id: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// PostgreSQL storage error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// `create_state` was called for a key that already holds a state.
    #[error("state already exists for {namespace}:{id}")]
    StateAlreadyExists { namespace: &'static str, id: String },

    /// The stored state changed between read and conditional write.
    ///
    /// The message that produced the write must be re-queued, never applied
    /// on top of the newer state.
    #[error("state changed concurrently for {namespace}:{id}")]
    StateConflict { namespace: &'static str, id: String },

    /// Workflow name was not registered with the decision worker.
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Workflow code returned an error instead of a decision.
    #[error("decision failed for workflow {workflow}: {reason}")]
    DecisionFailed { workflow: String, reason: String },

    /// Workflow name was registered more than once.
    #[error("duplicate workflow registration: {0}")]
    DuplicateWorkflow(String),

    /// Task name was registered more than once.
    #[error("duplicate task registration: {0}")]
    DuplicateTask(String),

    /// A task could not be registered or resolved.
    #[error(transparent)]
    Task(#[from] TaskFailure),

    /// Misuse of a [`CallCapture`](crate::capture::CallCapture).
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl Error {
    /// Create a state deserialization error with context.
    pub fn state_deserialization(
        namespace: &'static str,
        id: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Error::StateDeserialization {
            namespace,
            id: id.into(),
            source,
        }
    }

    /// Returns `true` for optimistic-concurrency conflicts.
    ///
    /// The runtime re-queues the message when this is the case.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::StateConflict { .. } | Error::StateAlreadyExists { .. }
        )
    }
}
