use serde::{Deserialize, Serialize};

use crate::Envelope;
use crate::data::TaskStatus;
use crate::id::{MessageId, TaskId, TaskName};

/// Status transitions, counted per task name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "type")]
#[envelope(entity = task_name)]
pub enum MonitoringPerNameMessage {
    TaskStatusUpdated {
        message_id: MessageId,
        task_name: TaskName,
        task_id: TaskId,
        /// `None` when the task was just dispatched.
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
    },
}

/// Notifications for the single global monitoring entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "type")]
#[envelope(entity = "global")]
pub enum MonitoringGlobalMessage {
    /// Sent once, the first time a task name is seen.
    TaskCreated {
        message_id: MessageId,
        task_name: TaskName,
    },
}
