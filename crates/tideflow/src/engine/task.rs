//! Task engine: attempts, retries, and status reporting for one task.
//!
//! The engine never runs anything itself. It asks executors to run attempts,
//! tracks which attempt is current, and decides what happens after a
//! failure. Messages about any other attempt are stale and ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Output, StateMachine, Transition, TransitionContext};
use crate::data::{SerializedData, TaskMeta, TaskOptions, TaskStatus};
use crate::id::{
    MessageId, MethodName, TaskAttemptId, TaskAttemptIndex, TaskId, TaskName, TaskRetry,
    WorkflowId,
};
use crate::messages::{
    CancelTaskAttempt, ExecuteTaskAttempt, MonitoringPerNameMessage, TaskEngineMessage,
    WorkflowMessage,
};
use crate::worker::TaskFailure;

/// Extra time given to an executor before the engine declares an attempt
/// timed out on its own.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Durable state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub task_name: TaskName,
    pub task_status: TaskStatus,
    pub method_name: MethodName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_parameter_types: Option<Vec<String>>,
    pub method_input: Vec<SerializedData>,
    pub task_options: TaskOptions,
    pub task_meta: TaskMeta,
    /// Workflow to notify on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    pub task_retry: TaskRetry,
    pub task_attempt_id: TaskAttemptId,
    pub task_attempt_index: TaskAttemptIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_task_attempt_error: Option<TaskFailure>,
    pub last_message_id: MessageId,
}

impl TaskState {
    fn is_current(&self, attempt_id: TaskAttemptId, attempt_index: TaskAttemptIndex) -> bool {
        self.task_attempt_id == attempt_id && self.task_attempt_index == attempt_index
    }

    fn set_status(&mut self, status: TaskStatus, out: &mut Vec<Output>) {
        if self.task_status == status {
            return;
        }
        out.push(Output::now(MonitoringPerNameMessage::TaskStatusUpdated {
            message_id: MessageId::new(),
            task_name: self.task_name.clone(),
            task_id: self.task_id,
            old_status: Some(self.task_status),
            new_status: status,
        }));
        self.task_status = status;
    }

    /// Ask an executor to run the current attempt.
    fn start_attempt(&self, ctx: &TransitionContext, out: &mut Vec<Output>) {
        out.push(Output::now(ExecuteTaskAttempt {
            message_id: MessageId::new(),
            task_name: self.task_name.clone(),
            task_id: self.task_id,
            task_retry: self.task_retry,
            task_attempt_id: self.task_attempt_id,
            task_attempt_index: self.task_attempt_index,
            previous_task_attempt_error: self.previous_task_attempt_error.clone(),
            method_name: self.method_name.clone(),
            method_parameter_types: self.method_parameter_types.clone(),
            method_input: self.method_input.clone(),
            task_options: self.task_options.clone(),
            task_meta: self.task_meta.clone(),
        }));

        let timeout = self
            .task_options
            .running_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        if let Some(timeout) = timeout {
            out.push(Output::delayed(
                TaskEngineMessage::TaskAttemptTimeout {
                    message_id: MessageId::new(),
                    task_id: self.task_id,
                    sent_at: ctx.now,
                    task_attempt_id: self.task_attempt_id,
                    task_attempt_index: self.task_attempt_index,
                    delay_before_retry: self.task_options.timeout_retry_delay,
                },
                timeout.saturating_add(TIMEOUT_GRACE),
            ));
        }
    }

    /// Record a failed attempt and schedule the next one if a delay is given.
    fn fail(&mut self, error: TaskFailure, delay_before_retry: Option<f64>, out: &mut Vec<Output>) {
        let delay = delay_before_retry
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        warn!(
            task_name = %self.task_name,
            task_id = %self.task_id,
            attempt_index = %self.task_attempt_index,
            cause = error.cause(),
            retry_in = ?delay,
            "Task attempt failed"
        );
        self.previous_task_attempt_error = Some(error);

        match delay {
            Some(delay) => {
                self.set_status(TaskStatus::RunningWarning, out);
                out.push(Output::delayed(
                    TaskEngineMessage::RetryTaskAttempt {
                        message_id: MessageId::new(),
                        task_id: self.task_id,
                        task_attempt_id: self.task_attempt_id,
                        task_attempt_index: self.task_attempt_index,
                    },
                    delay,
                ));
            }
            None => self.set_status(TaskStatus::RunningError, out),
        }
    }

    fn notify_workflow(&self, task_output: SerializedData, out: &mut Vec<Output>) {
        if let Some(workflow_id) = self.workflow_id {
            out.push(Output::now(WorkflowMessage::TaskCompleted {
                message_id: MessageId::new(),
                workflow_id,
                task_id: self.task_id,
                task_output,
            }));
        }
    }
}

/// State machine of the task engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskEngine;

impl StateMachine for TaskEngine {
    type Message = TaskEngineMessage;
    type State = TaskState;

    const NAME: &'static str = "task-engine";

    fn is_start(message: &Self::Message) -> bool {
        matches!(message, TaskEngineMessage::TaskDispatched { .. })
    }

    fn initial_state(message: &Self::Message) -> Option<Self::State> {
        match message {
            TaskEngineMessage::TaskDispatched {
                message_id,
                task_id,
                task_name,
                task_data,
                workflow_id,
            } => Some(TaskState {
                task_id: *task_id,
                task_name: task_name.clone(),
                task_status: TaskStatus::RunningOk,
                method_name: task_data.method_name.clone(),
                method_parameter_types: task_data.method_parameter_types.clone(),
                method_input: task_data.method_input.clone(),
                task_options: task_data.task_options.clone(),
                task_meta: task_data.task_meta.clone(),
                workflow_id: *workflow_id,
                task_retry: TaskRetry::default(),
                task_attempt_id: TaskAttemptId::new(),
                task_attempt_index: TaskAttemptIndex::default(),
                previous_task_attempt_error: None,
                last_message_id: *message_id,
            }),
            _ => None,
        }
    }

    fn state_id(state: &Self::State) -> String {
        state.task_id.to_string()
    }

    fn last_message_id(state: &Self::State) -> MessageId {
        state.last_message_id
    }

    fn set_last_message_id(state: &mut Self::State, message_id: MessageId) {
        state.last_message_id = message_id;
    }

    fn transition(
        ctx: &TransitionContext,
        mut state: Self::State,
        message: Self::Message,
    ) -> Transition<Self::State> {
        let mut out = Vec::new();

        match message {
            TaskEngineMessage::TaskDispatched { .. } => {
                if !ctx.created {
                    return Transition::reject("task already dispatched");
                }
                info!(task_name = %state.task_name, task_id = %state.task_id, "Task dispatched");
                out.push(Output::now(MonitoringPerNameMessage::TaskStatusUpdated {
                    message_id: MessageId::new(),
                    task_name: state.task_name.clone(),
                    task_id: state.task_id,
                    old_status: None,
                    new_status: state.task_status,
                }));
                state.start_attempt(ctx, &mut out);
            }
            TaskEngineMessage::RetryTask { .. } => {
                info!(
                    task_name = %state.task_name,
                    task_id = %state.task_id,
                    retry = %state.task_retry.next(),
                    "Task retried"
                );
                state.task_retry = state.task_retry.next();
                state.task_attempt_id = TaskAttemptId::new();
                state.task_attempt_index = TaskAttemptIndex::default();
                state.set_status(TaskStatus::RunningOk, &mut out);
                state.start_attempt(ctx, &mut out);
            }
            TaskEngineMessage::CancelTask { task_output, .. } => {
                info!(task_name = %state.task_name, task_id = %state.task_id, "Task canceled");
                out.push(Output::now(CancelTaskAttempt {
                    message_id: MessageId::new(),
                    task_name: state.task_name.clone(),
                    task_id: state.task_id,
                    task_output: task_output.clone(),
                    task_meta: state.task_meta.clone(),
                }));
                state.set_status(TaskStatus::TerminatedCanceled, &mut out);
                state.notify_workflow(task_output, &mut out);
                return Transition::terminate().with_outputs(out);
            }
            TaskEngineMessage::RetryTaskAttempt {
                task_attempt_id,
                task_attempt_index,
                ..
            } => {
                if !state.is_current(task_attempt_id, task_attempt_index)
                    || state.task_status != TaskStatus::RunningWarning
                {
                    debug!(task_id = %state.task_id, %task_attempt_id, "Stale retry ignored");
                    return Transition::keep(state);
                }
                state.task_attempt_id = TaskAttemptId::new();
                state.task_attempt_index = task_attempt_index.next();
                state.set_status(TaskStatus::RunningOk, &mut out);
                state.start_attempt(ctx, &mut out);
            }
            TaskEngineMessage::TaskAttemptStarted {
                task_attempt_id,
                task_attempt_index,
                ..
            } => {
                if state.is_current(task_attempt_id, task_attempt_index) {
                    debug!(task_id = %state.task_id, %task_attempt_id, "Task attempt running");
                } else {
                    debug!(
                        task_id = %state.task_id,
                        %task_attempt_id,
                        "Stale attempt start ignored"
                    );
                }
            }
            TaskEngineMessage::TaskAttemptCompleted {
                task_attempt_id,
                task_attempt_index,
                task_output,
                ..
            } => {
                if !state.is_current(task_attempt_id, task_attempt_index) {
                    debug!(task_id = %state.task_id, %task_attempt_id, "Stale completion ignored");
                    return Transition::keep(state);
                }
                info!(task_name = %state.task_name, task_id = %state.task_id, "Task completed");
                state.set_status(TaskStatus::TerminatedCompleted, &mut out);
                state.notify_workflow(task_output, &mut out);
                return Transition::terminate().with_outputs(out);
            }
            TaskEngineMessage::TaskAttemptFailed {
                task_attempt_id,
                task_attempt_index,
                task_attempt_error,
                delay_before_retry,
                ..
            } => {
                if !state.is_current(task_attempt_id, task_attempt_index)
                    || state.task_status != TaskStatus::RunningOk
                {
                    debug!(task_id = %state.task_id, %task_attempt_id, "Stale failure ignored");
                    return Transition::keep(state);
                }
                state.fail(task_attempt_error, delay_before_retry, &mut out);
            }
            TaskEngineMessage::TaskAttemptTimeout {
                task_attempt_id,
                task_attempt_index,
                delay_before_retry,
                sent_at,
                ..
            } => {
                if !state.is_current(task_attempt_id, task_attempt_index)
                    || state.task_status != TaskStatus::RunningOk
                {
                    debug!(task_id = %state.task_id, %task_attempt_id, "Stale timeout ignored");
                    return Transition::keep(state);
                }
                debug!(task_id = %state.task_id, %sent_at, "Attempt timed out");
                let error = TaskFailure::ProcessingTimeout {
                    task_name: state.task_name.to_string(),
                    timeout_secs: state.task_options.running_timeout.unwrap_or_default(),
                };
                state.fail(error, delay_before_retry, &mut out);
            }
        }

        Transition::keep(state).with_outputs(out)
    }
}
