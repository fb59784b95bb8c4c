//! Message families, one closed enum per consuming component.
//!
//! | Topic                  | Message                      | Keyed by      |
//! |------------------------|------------------------------|---------------|
//! | `workflow-engine`      | [`WorkflowMessage`]          | workflow id   |
//! | `decision-executor`    | [`DecisionDispatched`]       | workflow id   |
//! | `task-engine`          | [`TaskEngineMessage`]        | task id       |
//! | `task-executor`        | [`TaskExecutorMessage`]      | task id       |
//! | `monitoring-per-name`  | [`MonitoringPerNameMessage`] | task name     |
//! | `monitoring-global`    | [`MonitoringGlobalMessage`]  | `"global"`    |

mod executor;
mod monitoring;
mod task;
mod workflow;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use executor::{CancelTaskAttempt, ExecuteTaskAttempt, TaskExecutorMessage};
pub use monitoring::{MonitoringGlobalMessage, MonitoringPerNameMessage};
pub use task::TaskEngineMessage;
pub use workflow::{DecisionDispatched, WorkflowMessage};

use crate::Envelope;

/// Destination of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    WorkflowEngine,
    DecisionExecutor,
    TaskEngine,
    TaskExecutor,
    MonitoringPerName,
    MonitoringGlobal,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::WorkflowEngine => "workflow-engine",
            Topic::DecisionExecutor => "decision-executor",
            Topic::TaskEngine => "task-engine",
            Topic::TaskExecutor => "task-executor",
            Topic::MonitoringPerName => "monitoring-per-name",
            Topic::MonitoringGlobal => "monitoring-global",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any message, tagged with its family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "topic", content = "message")]
pub enum Message {
    Workflow(WorkflowMessage),
    Decision(DecisionDispatched),
    TaskEngine(TaskEngineMessage),
    TaskExecutor(TaskExecutorMessage),
    MonitoringPerName(MonitoringPerNameMessage),
    MonitoringGlobal(MonitoringGlobalMessage),
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::Workflow(_) => Topic::WorkflowEngine,
            Message::Decision(_) => Topic::DecisionExecutor,
            Message::TaskEngine(_) => Topic::TaskEngine,
            Message::TaskExecutor(_) => Topic::TaskExecutor,
            Message::MonitoringPerName(_) => Topic::MonitoringPerName,
            Message::MonitoringGlobal(_) => Topic::MonitoringGlobal,
        }
    }
}

macro_rules! impl_from_message {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(message: $ty) -> Self {
                    Message::$variant(message)
                }
            }
        )*
    };
}

impl_from_message!(
    Workflow(WorkflowMessage),
    Decision(DecisionDispatched),
    TaskEngine(TaskEngineMessage),
    TaskExecutor(TaskExecutorMessage),
    MonitoringPerName(MonitoringPerNameMessage),
    MonitoringGlobal(MonitoringGlobalMessage),
);

impl From<ExecuteTaskAttempt> for Message {
    fn from(message: ExecuteTaskAttempt) -> Self {
        Message::TaskExecutor(TaskExecutorMessage::ExecuteTaskAttempt(message))
    }
}

impl From<CancelTaskAttempt> for Message {
    fn from(message: CancelTaskAttempt) -> Self {
        Message::TaskExecutor(TaskExecutorMessage::CancelTaskAttempt(message))
    }
}
