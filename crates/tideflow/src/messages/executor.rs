use serde::{Deserialize, Serialize};

use crate::Envelope;
use crate::data::{SerializedData, TaskMeta, TaskOptions};
use crate::id::{
    MessageId, MethodName, TaskAttemptId, TaskAttemptIndex, TaskId, TaskName, TaskRetry,
};
use crate::worker::TaskFailure;

/// Messages handled by task executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "type")]
pub enum TaskExecutorMessage {
    ExecuteTaskAttempt(ExecuteTaskAttempt),
    CancelTaskAttempt(CancelTaskAttempt),
}

/// Run one attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[envelope(entity = task_id)]
pub struct ExecuteTaskAttempt {
    pub message_id: MessageId,
    pub task_name: TaskName,
    pub task_id: TaskId,
    pub task_retry: TaskRetry,
    pub task_attempt_id: TaskAttemptId,
    pub task_attempt_index: TaskAttemptIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_task_attempt_error: Option<TaskFailure>,
    pub method_name: MethodName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_parameter_types: Option<Vec<String>>,
    pub method_input: Vec<SerializedData>,
    #[serde(default)]
    pub task_options: TaskOptions,
    #[serde(default)]
    pub task_meta: TaskMeta,
}

/// Stop a running attempt, best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[envelope(entity = task_id)]
pub struct CancelTaskAttempt {
    pub message_id: MessageId,
    pub task_name: TaskName,
    pub task_id: TaskId,
    pub task_output: SerializedData,
    #[serde(default)]
    pub task_meta: TaskMeta,
}
