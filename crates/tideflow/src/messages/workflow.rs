use serde::{Deserialize, Serialize};

use crate::Envelope;
use crate::data::SerializedData;
use crate::id::{
    DecisionId, DecisionName, EventName, MessageId, TaskId, TimerId, WorkflowId, WorkflowName,
};
use crate::workflow::{DecisionInput, DecisionOutput};

/// Messages handled by the workflow engine, keyed by workflow id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[serde(tag = "type")]
#[envelope(entity = workflow_id)]
pub enum WorkflowMessage {
    /// Starts a workflow. The only message that may create state.
    WorkflowDispatched {
        message_id: MessageId,
        workflow_id: WorkflowId,
        workflow_name: WorkflowName,
        workflow_data: SerializedData,
        /// Set when started as a child of another workflow.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_workflow_id: Option<WorkflowId>,
    },
    DecisionCompleted {
        message_id: MessageId,
        workflow_id: WorkflowId,
        decision_id: DecisionId,
        decision_output: DecisionOutput,
    },
    TaskCompleted {
        message_id: MessageId,
        workflow_id: WorkflowId,
        task_id: TaskId,
        task_output: SerializedData,
    },
    ChildWorkflowCompleted {
        message_id: MessageId,
        workflow_id: WorkflowId,
        child_workflow_id: WorkflowId,
        child_workflow_output: SerializedData,
    },
    TimerCompleted {
        message_id: MessageId,
        workflow_id: WorkflowId,
        timer_id: TimerId,
    },
    EventReceived {
        message_id: MessageId,
        workflow_id: WorkflowId,
        event_name: EventName,
        event_data: SerializedData,
    },
    WorkflowCompleted {
        message_id: MessageId,
        workflow_id: WorkflowId,
        workflow_output: SerializedData,
    },
}

/// Asks workflow code to compute the next decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Envelope)]
#[envelope(entity = workflow_id)]
pub struct DecisionDispatched {
    pub message_id: MessageId,
    pub decision_id: DecisionId,
    pub workflow_id: WorkflowId,
    pub decision_name: DecisionName,
    pub decision_data: DecisionInput,
}
