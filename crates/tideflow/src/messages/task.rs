use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::Envelope;
use crate::data::{SerializedData, TaskData};
use crate::id::{MessageId, TaskAttemptId, TaskAttemptIndex, TaskId, TaskName, WorkflowId};
use crate::worker::TaskFailure;

/// Messages handled by the task engine, keyed by task id.
///
/// Attempt messages name the attempt they report on; the engine ignores
/// those that do not match the current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "type")]
#[envelope(entity = task_id)]
pub enum TaskEngineMessage {
    /// Starts a task. The only message that may create state.
    TaskDispatched {
        message_id: MessageId,
        task_id: TaskId,
        task_name: TaskName,
        task_data: TaskData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<WorkflowId>,
    },
    /// Starts a new retry cycle by hand.
    RetryTask {
        message_id: MessageId,
        task_id: TaskId,
    },
    CancelTask {
        message_id: MessageId,
        task_id: TaskId,
        task_output: SerializedData,
    },
    /// Scheduled by the engine after a retryable failure.
    RetryTaskAttempt {
        message_id: MessageId,
        task_id: TaskId,
        task_attempt_id: TaskAttemptId,
        task_attempt_index: TaskAttemptIndex,
    },
    TaskAttemptStarted {
        message_id: MessageId,
        task_id: TaskId,
        task_attempt_id: TaskAttemptId,
        task_attempt_index: TaskAttemptIndex,
    },
    TaskAttemptCompleted {
        message_id: MessageId,
        task_id: TaskId,
        task_attempt_id: TaskAttemptId,
        task_attempt_index: TaskAttemptIndex,
        task_output: SerializedData,
    },
    TaskAttemptFailed {
        message_id: MessageId,
        task_id: TaskId,
        task_attempt_id: TaskAttemptId,
        task_attempt_index: TaskAttemptIndex,
        task_attempt_error: TaskFailure,
        /// Seconds before the next attempt. `None` means no retry.
        delay_before_retry: Option<f64>,
    },
    /// Scheduled by the engine when an attempt starts with a running timeout.
    TaskAttemptTimeout {
        message_id: MessageId,
        task_id: TaskId,
        sent_at: OffsetDateTime,
        task_attempt_id: TaskAttemptId,
        task_attempt_index: TaskAttemptIndex,
        delay_before_retry: Option<f64>,
    },
}
