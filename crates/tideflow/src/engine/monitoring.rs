//! Monitoring engines: task counts per name, and the set of known names.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{StateMachine, Transition, TransitionContext};
use crate::Envelope;
use crate::data::TaskStatus;
use crate::id::{MessageId, TaskName};
use crate::messages::{MonitoringGlobalMessage, MonitoringPerNameMessage};

/// Entity id of the single global monitoring state.
pub const GLOBAL_ENTITY: &str = "global";

/// Number of tasks of one name in each status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPerNameState {
    pub task_name: TaskName,
    pub running_ok: u64,
    pub running_warning: u64,
    pub running_error: u64,
    pub terminated_completed: u64,
    pub terminated_canceled: u64,
    pub last_message_id: MessageId,
}

impl MonitoringPerNameState {
    fn new(task_name: TaskName, message_id: MessageId) -> Self {
        Self {
            task_name,
            running_ok: 0,
            running_warning: 0,
            running_error: 0,
            terminated_completed: 0,
            terminated_canceled: 0,
            last_message_id: message_id,
        }
    }

    /// Current count for `status`.
    pub fn count(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::RunningOk => self.running_ok,
            TaskStatus::RunningWarning => self.running_warning,
            TaskStatus::RunningError => self.running_error,
            TaskStatus::TerminatedCompleted => self.terminated_completed,
            TaskStatus::TerminatedCanceled => self.terminated_canceled,
        }
    }

    fn counter(&mut self, status: TaskStatus) -> &mut u64 {
        match status {
            TaskStatus::RunningOk => &mut self.running_ok,
            TaskStatus::RunningWarning => &mut self.running_warning,
            TaskStatus::RunningError => &mut self.running_error,
            TaskStatus::TerminatedCompleted => &mut self.terminated_completed,
            TaskStatus::TerminatedCanceled => &mut self.terminated_canceled,
        }
    }
}

/// Counts task statuses per task name.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringPerName;

impl StateMachine for MonitoringPerName {
    type Message = MonitoringPerNameMessage;
    type State = MonitoringPerNameState;

    const NAME: &'static str = "monitoring-per-name";

    fn is_start(_message: &Self::Message) -> bool {
        false
    }

    fn initial_state(message: &Self::Message) -> Option<Self::State> {
        match message {
            MonitoringPerNameMessage::TaskStatusUpdated {
                message_id,
                task_name,
                ..
            } => Some(MonitoringPerNameState::new(task_name.clone(), *message_id)),
        }
    }

    fn state_id(state: &Self::State) -> String {
        state.task_name.to_string()
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
        let MonitoringPerNameMessage::TaskStatusUpdated {
            task_id,
            old_status,
            new_status,
            ..
        } = message;

        if let Some(old_status) = old_status {
            let counter = state.counter(old_status);
            match counter.checked_sub(1) {
                Some(count) => *counter = count,
                None => warn!(
                    task_name = %state.task_name,
                    %task_id,
                    status = ?old_status,
                    "Status count would go below zero, kept at zero"
                ),
            }
        }
        let counter = state.counter(new_status);
        *counter = counter.saturating_add(1);

        if !ctx.created {
            return Transition::keep(state);
        }
        info!(task_name = %state.task_name, "New task name");
        let task_name = state.task_name.clone();
        Transition::keep(state).with_output(MonitoringGlobalMessage::TaskCreated {
            message_id: MessageId::new(),
            task_name,
        })
    }
}

/// Every task name seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringGlobalState {
    pub task_names: BTreeSet<TaskName>,
    pub last_message_id: MessageId,
}

/// Keeps the set of known task names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringGlobal;

impl StateMachine for MonitoringGlobal {
    type Message = MonitoringGlobalMessage;
    type State = MonitoringGlobalState;

    const NAME: &'static str = "monitoring-global";

    fn is_start(_message: &Self::Message) -> bool {
        false
    }

    fn initial_state(message: &Self::Message) -> Option<Self::State> {
        Some(MonitoringGlobalState {
            task_names: BTreeSet::new(),
            last_message_id: message.message_id(),
        })
    }

    fn state_id(_state: &Self::State) -> String {
        GLOBAL_ENTITY.to_string()
    }

    fn last_message_id(state: &Self::State) -> MessageId {
        state.last_message_id
    }

    fn set_last_message_id(state: &mut Self::State, message_id: MessageId) {
        state.last_message_id = message_id;
    }

    fn transition(
        _ctx: &TransitionContext,
        mut state: Self::State,
        message: Self::Message,
    ) -> Transition<Self::State> {
        match message {
            MonitoringGlobalMessage::TaskCreated { task_name, .. } => {
                state.task_names.insert(task_name);
            }
        }
        Transition::keep(state)
    }
}
