//! Decision payloads exchanged between the workflow engine and workflow code.

use std::collections::BTreeMap;

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::branch::{Branch, INPUT_PROPERTY, PropertyStore, Step};
use crate::data::{SerializedData, TaskData};
use crate::error::Result;
use crate::id::{BranchId, BranchName, EventName, PropertyName, TaskName, WorkflowId, WorkflowName};

/// Everything a decision may look at: the branches that need attention and
/// the property values they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub workflow_id: WorkflowId,
    pub workflow_name: WorkflowName,
    pub branches: NonEmpty<Branch>,
    /// Filtered to the hashes referenced by `branches`.
    pub store: PropertyStore,
}

impl DecisionInput {
    /// Decode the input a branch was started with.
    pub fn branch_input<T: DeserializeOwned>(&self, branch: &Branch) -> Result<Option<T>> {
        branch
            .input_hash()
            .and_then(|hash| self.store.get(hash))
            .map(SerializedData::decode)
            .transpose()
    }

    /// Decode the latest value of a workflow property as seen by `branch`.
    pub fn property<T: DeserializeOwned>(&self, branch: &Branch, name: &str) -> Result<Option<T>> {
        branch
            .latest_properties()
            .get(name)
            .and_then(|hash| self.store.get(hash))
            .map(SerializedData::decode)
            .transpose()
    }

    /// Decode the output of a completed step.
    pub fn step_output<T: DeserializeOwned>(&self, step: &Step) -> Result<Option<T>> {
        step.output_hash()
            .and_then(|hash| self.store.get(hash))
            .map(SerializedData::decode)
            .transpose()
    }
}

/// The outcome of a decision: one entry per branch that has something to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutput {
    pub branches: Vec<BranchDecision>,
}

impl DecisionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch: BranchDecision) -> Self {
        self.branches.push(branch);
        self
    }
}

/// What one branch does next.
///
/// Applied in field order: properties are recorded first, so commands and
/// new branches observe them.
///
/// # Example
///
/// ```ignore
/// BranchDecision::for_branch(branch.branch_id)
///     .with_property("total", SerializedData::encode(&42)?)
///     .dispatch_task("email", task_data)
///     .start_timer(30.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub branch_id: BranchId,
    #[serde(default)]
    pub properties: BTreeMap<PropertyName, SerializedData>,
    #[serde(default)]
    pub commands: Vec<NewCommand>,
    #[serde(default)]
    pub new_branches: Vec<NewBranch>,
    /// Completes the branch. Completing the root branch completes the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<SerializedData>,
}

impl BranchDecision {
    pub fn for_branch(branch_id: BranchId) -> Self {
        Self {
            branch_id,
            properties: BTreeMap::new(),
            commands: Vec::new(),
            new_branches: Vec::new(),
            output: None,
        }
    }

    /// Set a workflow property.
    pub fn with_property(mut self, name: impl Into<PropertyName>, value: SerializedData) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_command(mut self, command: NewCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn dispatch_task(self, task_name: impl Into<TaskName>, task_data: TaskData) -> Self {
        self.with_command(NewCommand::DispatchTask {
            task_name: task_name.into(),
            task_data,
        })
    }

    pub fn dispatch_child_workflow(
        self,
        workflow_name: impl Into<WorkflowName>,
        workflow_data: SerializedData,
    ) -> Self {
        self.with_command(NewCommand::DispatchChildWorkflow {
            workflow_name: workflow_name.into(),
            workflow_data,
        })
    }

    pub fn start_timer(self, duration_secs: f64) -> Self {
        self.with_command(NewCommand::StartTimer { duration_secs })
    }

    pub fn await_event(self, event_name: impl Into<EventName>) -> Self {
        self.with_command(NewCommand::AwaitEvent {
            event_name: event_name.into(),
        })
    }

    /// Fork a new branch running in parallel with this one.
    pub fn with_new_branch(
        mut self,
        branch_name: impl Into<BranchName>,
        branch_input: SerializedData,
    ) -> Self {
        self.new_branches.push(NewBranch {
            branch_name: branch_name.into(),
            branch_input,
        });
        self
    }

    /// Complete this branch with `output`.
    pub fn complete(mut self, output: SerializedData) -> Self {
        self.output = Some(output);
        self
    }
}

/// A command requested by a decision. The engine assigns its ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NewCommand {
    DispatchTask {
        task_name: TaskName,
        task_data: TaskData,
    },
    DispatchChildWorkflow {
        workflow_name: WorkflowName,
        workflow_data: SerializedData,
    },
    StartTimer {
        duration_secs: f64,
    },
    AwaitEvent {
        event_name: EventName,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBranch {
    pub branch_name: BranchName,
    pub branch_input: SerializedData,
}

/// Name under which a completed branch's output is published to its parent.
pub(crate) fn branch_output_property(branch_name: &BranchName) -> PropertyName {
    PropertyName::new(format!("${}", branch_name))
}

pub(crate) fn input_property() -> PropertyName {
    PropertyName::new(INPUT_PROPERTY)
}
