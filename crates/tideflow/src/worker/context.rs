//! Task attempt context with retry and idempotency metadata.

use std::sync::{Arc, OnceLock};

use crate::data::{TaskMeta, TaskOptions};
use crate::id::{TaskAttemptId, TaskAttemptIndex, TaskId, TaskName, TaskRetry};
use crate::messages::ExecuteTaskAttempt;

use super::failure::TaskFailure;

/// Context provided to task handlers and retry-delay callbacks.
///
/// Everything is fixed when the attempt starts, except the failure, which
/// the executor records at most once when the attempt fails.
///
/// # Idempotency
///
/// Use [`idempotency_key()`](Self::idempotency_key) when calling external APIs
/// that support idempotency keys. The key is stable across automatic retries
/// and manual retry cycles, and unique per task.
///
/// # Example
///
/// ```ignore
/// Task::new().method("charge", |ctx: TaskAttemptContext, (amount,): (u64,)| async move {
///     let receipt = payments.charge(amount, ctx.idempotency_key()).await?;
///     Ok(receipt.id)
/// })
/// ```
#[derive(Debug, Clone)]
pub struct TaskAttemptContext {
    pub task_name: TaskName,
    pub task_id: TaskId,
    pub task_attempt_id: TaskAttemptId,
    /// Attempt number within the current retry cycle, starting at 0.
    pub task_attempt_index: TaskAttemptIndex,
    /// Manual retry cycle, starting at 0.
    pub task_retry: TaskRetry,
    /// Failure of the attempt before this one, if any.
    pub previous_failure: Option<TaskFailure>,
    pub task_options: TaskOptions,
    pub task_meta: TaskMeta,
    failure: Arc<OnceLock<TaskFailure>>,
}

impl TaskAttemptContext {
    pub fn from_message(message: &ExecuteTaskAttempt) -> Self {
        Self {
            task_name: message.task_name.clone(),
            task_id: message.task_id,
            task_attempt_id: message.task_attempt_id,
            task_attempt_index: message.task_attempt_index,
            task_retry: message.task_retry,
            previous_failure: message.previous_task_attempt_error.clone(),
            task_options: message.task_options.clone(),
            task_meta: message.task_meta.clone(),
            failure: Arc::default(),
        }
    }

    /// Key for external service calls: `{task_name}:{task_id}`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.task_name, self.task_id)
    }

    /// Returns `true` if an earlier attempt of this task ran.
    pub fn is_retry(&self) -> bool {
        self.task_attempt_index.0 > 0 || self.task_retry.0 > 0
    }

    /// The failure of this attempt, once recorded.
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.get()
    }

    /// Record the failure of this attempt.
    ///
    /// Returns `false` and keeps the first failure if one was already set.
    pub(crate) fn set_failure(&self, failure: TaskFailure) -> bool {
        self.failure.set(failure).is_ok()
    }
}
