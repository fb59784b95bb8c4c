//! Branches, steps, and the workflow property store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::{PropertyHash, SerializedData};
use crate::id::{
    BranchId, BranchName, EventName, PropertyName, TaskId, TaskName, TimerId, WorkflowId,
    WorkflowName,
};

/// Reserved property holding a branch's input.
pub const INPUT_PROPERTY: &str = "$input";

/// Reserved property holding a completed step's output.
pub const OUTPUT_PROPERTY: &str = "$output";

/// Property name to value-hash references.
pub type Properties = BTreeMap<PropertyName, PropertyHash>;

/// Workflow-scoped map of property values, keyed by content hash.
///
/// Identical values produced by different branches or steps are stored once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyStore(BTreeMap<PropertyHash, SerializedData>);

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its hash.
    pub fn insert(&mut self, value: SerializedData) -> PropertyHash {
        let hash = value.content_hash();
        self.0.entry(hash.clone()).or_insert(value);
        hash
    }

    pub fn get(&self, hash: &PropertyHash) -> Option<&SerializedData> {
        self.0.get(hash)
    }

    pub fn contains(&self, hash: &PropertyHash) -> bool {
        self.0.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &PropertyHash> {
        self.0.keys()
    }
}

/// Keep only the store entries referenced by `branches`.
///
/// A branch references every hash in its start snapshot and in the
/// post-completion snapshot of each of its steps. The result holds exactly
/// those hashes that are present in `store`.
pub fn filter_store<'a>(
    store: &PropertyStore,
    branches: impl IntoIterator<Item = &'a Branch>,
) -> PropertyStore {
    let referenced: BTreeSet<&PropertyHash> = branches
        .into_iter()
        .flat_map(Branch::referenced_hashes)
        .collect();

    PropertyStore(
        store
            .0
            .iter()
            .filter(|(hash, _)| referenced.contains(hash))
            .map(|(hash, value)| (hash.clone(), value.clone()))
            .collect(),
    )
}

/// One execution path within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: BranchId,
    pub branch_name: BranchName,
    /// `None` for the root branch started by the workflow dispatch.
    pub parent_branch_id: Option<BranchId>,
    /// Workflow properties at branch creation, plus [`INPUT_PROPERTY`].
    pub properties_at_start: Properties,
    /// Append-only.
    pub steps: Vec<Step>,
}

impl Branch {
    pub fn new(
        branch_name: BranchName,
        parent_branch_id: Option<BranchId>,
        properties_at_start: Properties,
    ) -> Self {
        Self {
            branch_id: BranchId::new(),
            branch_name,
            parent_branch_id,
            properties_at_start,
            steps: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_branch_id.is_none()
    }

    pub fn input_hash(&self) -> Option<&PropertyHash> {
        self.properties_at_start.get(INPUT_PROPERTY)
    }

    /// Property references as of the latest completed step.
    pub fn latest_properties(&self) -> &Properties {
        self.steps
            .iter()
            .rev()
            .find_map(|step| step.properties_after_completion.as_ref())
            .unwrap_or(&self.properties_at_start)
    }

    /// Index of the first ongoing step waiting for `completion`.
    pub fn waiting_step(&self, completion: &Completion) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.is_ongoing() && step.command.awaits(completion))
    }

    fn referenced_hashes(&self) -> impl Iterator<Item = &PropertyHash> {
        self.properties_at_start.values().chain(
            self.steps
                .iter()
                .filter_map(|step| step.properties_after_completion.as_ref())
                .flat_map(|properties| properties.values()),
        )
    }
}

/// A command issued by a branch, and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub command: Command,
    pub status: StepStatus,
    /// Workflow properties when the step completed, plus [`OUTPUT_PROPERTY`].
    pub properties_after_completion: Option<Properties>,
}

impl Step {
    pub fn ongoing(command: Command) -> Self {
        Self {
            command,
            status: StepStatus::Ongoing,
            properties_after_completion: None,
        }
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == StepStatus::Ongoing
    }

    pub fn output_hash(&self) -> Option<&PropertyHash> {
        self.properties_after_completion
            .as_ref()
            .and_then(|properties| properties.get(OUTPUT_PROPERTY))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ongoing,
    Completed,
}

/// What a step waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    DispatchTask {
        task_id: TaskId,
        task_name: TaskName,
    },
    DispatchChildWorkflow {
        workflow_id: WorkflowId,
        workflow_name: WorkflowName,
    },
    StartTimer {
        timer_id: TimerId,
        duration_secs: f64,
    },
    AwaitEvent {
        event_name: EventName,
    },
    /// Added to a branch when it forks; completes with the child's output.
    AwaitBranch {
        branch_id: BranchId,
        branch_name: BranchName,
    },
}

impl Command {
    pub fn awaits(&self, completion: &Completion) -> bool {
        match (self, completion) {
            (Command::DispatchTask { task_id, .. }, Completion::Task(id)) => task_id == id,
            (Command::DispatchChildWorkflow { workflow_id, .. }, Completion::ChildWorkflow(id)) => {
                workflow_id == id
            }
            (Command::StartTimer { timer_id, .. }, Completion::Timer(id)) => timer_id == id,
            (Command::AwaitEvent { event_name }, Completion::Event(name)) => event_name == name,
            (Command::AwaitBranch { branch_id, .. }, Completion::Branch(id)) => branch_id == id,
            _ => false,
        }
    }
}

/// Something a step can be waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Task(TaskId),
    ChildWorkflow(WorkflowId),
    Timer(TimerId),
    Event(EventName),
    Branch(BranchId),
}
