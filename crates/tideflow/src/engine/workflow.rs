//! Workflow engine: branches, steps, and the single in-flight decision.
//!
//! While a decision is outstanding every other message is buffered. When the
//! decision completes its effects are applied, and buffered messages are
//! replayed in arrival order until one of them starts a new decision.

use std::time::Duration;

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Output, StateMachine, Transition, TransitionContext};
use crate::Envelope;
use crate::data::SerializedData;
use crate::id::{
    BranchId, BranchName, DecisionId, DecisionName, MessageId, PropertyName, TaskId, TimerId,
    WorkflowId, WorkflowName,
};
use crate::messages::{DecisionDispatched, TaskEngineMessage, WorkflowMessage};
use crate::workflow::{
    Branch, BranchDecision, Command, Completion, DecisionInput, DecisionOutput, NewBranch,
    NewCommand, OUTPUT_PROPERTY, Properties, PropertyStore, Step, StepStatus,
    branch_output_property, filter_store, input_property,
};

/// Name of the branch started by the workflow dispatch.
pub const ROOT_BRANCH: &str = "main";

/// Durable state of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub workflow_name: WorkflowName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<WorkflowId>,
    /// Set exactly while a decision is outstanding.
    pub ongoing_decision_id: Option<DecisionId>,
    pub running_branches: Vec<Branch>,
    /// Non-empty only while a decision is outstanding.
    pub buffered_messages: Vec<WorkflowMessage>,
    pub store: PropertyStore,
    /// Workflow-wide property values, as set by decisions.
    pub current_properties: Properties,
    pub last_message_id: MessageId,
}

impl WorkflowState {
    fn new(
        message_id: MessageId,
        workflow_id: WorkflowId,
        workflow_name: WorkflowName,
        parent_workflow_id: Option<WorkflowId>,
    ) -> Self {
        Self {
            workflow_id,
            workflow_name,
            parent_workflow_id,
            ongoing_decision_id: None,
            running_branches: Vec::new(),
            buffered_messages: Vec::new(),
            store: PropertyStore::new(),
            current_properties: Properties::new(),
            last_message_id: message_id,
        }
    }

    pub fn branch(&self, branch_id: BranchId) -> Option<&Branch> {
        self.running_branches
            .iter()
            .find(|branch| branch.branch_id == branch_id)
    }

    fn branch_index(&self, branch_id: BranchId) -> Option<usize> {
        self.running_branches
            .iter()
            .position(|branch| branch.branch_id == branch_id)
    }

    fn start(&mut self, workflow_data: SerializedData, out: &mut Vec<Output>) {
        let mut properties = self.current_properties.clone();
        properties.insert(input_property(), self.store.insert(workflow_data));
        let root = Branch::new(BranchName::new(ROOT_BRANCH), None, properties);
        let root_id = root.branch_id;
        self.running_branches.push(root);
        self.dispatch_decision(&[root_id], out);
    }

    fn buffer(&mut self, message: WorkflowMessage) {
        let message_id = message.message_id();
        if self
            .buffered_messages
            .iter()
            .any(|buffered| buffered.message_id() == message_id)
        {
            debug!(workflow_id = %self.workflow_id, %message_id, "Message already buffered");
            return;
        }
        debug!(
            workflow_id = %self.workflow_id,
            %message_id,
            kind = message.kind(),
            "Decision outstanding, message buffered"
        );
        self.buffered_messages.push(message);
    }

    /// Replay buffered messages until one starts a decision.
    fn drain(&mut self, ctx: &TransitionContext, out: &mut Vec<Output>) -> Flow {
        while self.ongoing_decision_id.is_none() && !self.buffered_messages.is_empty() {
            let message = self.buffered_messages.remove(0);
            if self.apply(ctx, message, out) == Flow::Finalized {
                return Flow::Finalized;
            }
        }
        Flow::Running
    }

    /// Apply a message that does not need to wait for a decision.
    fn apply(
        &mut self,
        ctx: &TransitionContext,
        message: WorkflowMessage,
        out: &mut Vec<Output>,
    ) -> Flow {
        let (completion, value) = match message {
            WorkflowMessage::TaskCompleted {
                task_id,
                task_output,
                ..
            } => (Completion::Task(task_id), task_output),
            WorkflowMessage::ChildWorkflowCompleted {
                child_workflow_id,
                child_workflow_output,
                ..
            } => (
                Completion::ChildWorkflow(child_workflow_id),
                child_workflow_output,
            ),
            WorkflowMessage::TimerCompleted { timer_id, .. } => (
                Completion::Timer(timer_id),
                serde_json::Value::from(ctx.now.unix_timestamp()).into(),
            ),
            WorkflowMessage::EventReceived {
                event_name,
                event_data,
                ..
            } => (Completion::Event(event_name), event_data),
            WorkflowMessage::WorkflowCompleted {
                workflow_output, ..
            } => {
                self.finalize(workflow_output, out);
                return Flow::Finalized;
            }
            WorkflowMessage::WorkflowDispatched { .. }
            | WorkflowMessage::DecisionCompleted { .. } => {
                warn!(workflow_id = %self.workflow_id, "Unexpected message in buffer, dropped");
                return Flow::Running;
            }
        };

        match self.complete_step(&completion, value) {
            Some(branch_id) => self.dispatch_decision(&[branch_id], out),
            None => warn!(
                workflow_id = %self.workflow_id,
                ?completion,
                "No step is waiting for this completion, dropped"
            ),
        }
        Flow::Running
    }

    /// Mark the first step waiting on `completion` as completed.
    ///
    /// Returns the id of the branch owning the step.
    fn complete_step(
        &mut self,
        completion: &Completion,
        value: SerializedData,
    ) -> Option<BranchId> {
        let (branch_index, step_index) =
            self.running_branches
                .iter()
                .enumerate()
                .find_map(|(branch_index, branch)| {
                    branch
                        .waiting_step(completion)
                        .map(|step_index| (branch_index, step_index))
                })?;

        let mut after = self.current_properties.clone();
        after.insert(PropertyName::new(OUTPUT_PROPERTY), self.store.insert(value));

        let branch = &mut self.running_branches[branch_index];
        let step = &mut branch.steps[step_index];
        step.status = StepStatus::Completed;
        step.properties_after_completion = Some(after);
        Some(branch.branch_id)
    }

    fn apply_decision(&mut self, output: DecisionOutput, out: &mut Vec<Output>) -> Flow {
        let mut needs_decision = Vec::new();

        for decision in output.branches {
            let BranchDecision {
                branch_id,
                properties,
                commands,
                new_branches,
                output,
            } = decision;

            let Some(index) = self.branch_index(branch_id) else {
                warn!(
                    workflow_id = %self.workflow_id,
                    %branch_id,
                    "Decision for a branch that is not running, ignored"
                );
                continue;
            };

            for (name, value) in properties {
                let hash = self.store.insert(value);
                self.current_properties.insert(name, hash);
            }

            for command in commands {
                self.issue_command(index, command, out);
            }

            for new_branch in new_branches {
                needs_decision.push(self.fork(index, new_branch));
            }

            if let Some(output) = output {
                if self.running_branches[index].is_root() {
                    self.finalize(output, out);
                    return Flow::Finalized;
                }
                if let Some(parent_id) = self.complete_branch(index, output) {
                    needs_decision.push(parent_id);
                }
            }
        }

        self.dispatch_decision(&needs_decision, out);
        Flow::Running
    }

    fn issue_command(&mut self, index: usize, command: NewCommand, out: &mut Vec<Output>) {
        let workflow_id = self.workflow_id;
        let command = match command {
            NewCommand::DispatchTask {
                task_name,
                task_data,
            } => {
                let task_id = TaskId::new();
                out.push(Output::now(TaskEngineMessage::TaskDispatched {
                    message_id: MessageId::new(),
                    task_id,
                    task_name: task_name.clone(),
                    task_data,
                    workflow_id: Some(workflow_id),
                }));
                Command::DispatchTask { task_id, task_name }
            }
            NewCommand::DispatchChildWorkflow {
                workflow_name,
                workflow_data,
            } => {
                let child_id = WorkflowId::new();
                out.push(Output::now(WorkflowMessage::WorkflowDispatched {
                    message_id: MessageId::new(),
                    workflow_id: child_id,
                    workflow_name: workflow_name.clone(),
                    workflow_data,
                    parent_workflow_id: Some(workflow_id),
                }));
                Command::DispatchChildWorkflow {
                    workflow_id: child_id,
                    workflow_name,
                }
            }
            NewCommand::StartTimer { duration_secs } => {
                let timer_id = TimerId::new();
                let after = Duration::try_from_secs_f64(duration_secs).unwrap_or(Duration::ZERO);
                out.push(Output::delayed(
                    WorkflowMessage::TimerCompleted {
                        message_id: MessageId::new(),
                        workflow_id,
                        timer_id,
                    },
                    after,
                ));
                Command::StartTimer {
                    timer_id,
                    duration_secs,
                }
            }
            NewCommand::AwaitEvent { event_name } => Command::AwaitEvent { event_name },
        };

        self.running_branches[index].steps.push(Step::ongoing(command));
    }

    /// Start a child branch of the branch at `parent_index`.
    fn fork(&mut self, parent_index: usize, new_branch: NewBranch) -> BranchId {
        let NewBranch {
            branch_name,
            branch_input,
        } = new_branch;

        let mut properties = self.current_properties.clone();
        properties.insert(input_property(), self.store.insert(branch_input));

        let parent = &mut self.running_branches[parent_index];
        let branch = Branch::new(branch_name.clone(), Some(parent.branch_id), properties);
        let branch_id = branch.branch_id;
        parent.steps.push(Step::ongoing(Command::AwaitBranch {
            branch_id,
            branch_name,
        }));

        self.running_branches.push(branch);
        branch_id
    }

    /// Remove a completed non-root branch and publish its output.
    ///
    /// Returns the parent branch id if the parent is still waiting for it.
    fn complete_branch(&mut self, index: usize, output: SerializedData) -> Option<BranchId> {
        let branch = self.running_branches.remove(index);
        let hash = self.store.insert(output.clone());
        self.current_properties
            .insert(branch_output_property(&branch.branch_name), hash);

        let parent_id = self.complete_step(&Completion::Branch(branch.branch_id), output);
        if parent_id.is_none() {
            debug!(
                workflow_id = %self.workflow_id,
                branch_id = %branch.branch_id,
                "Branch completed after its parent"
            );
        }
        parent_id
    }

    /// Ask for a decision over the given running branches.
    fn dispatch_decision(&mut self, branch_ids: &[BranchId], out: &mut Vec<Output>) {
        let branches: Vec<Branch> = self
            .running_branches
            .iter()
            .filter(|branch| branch_ids.contains(&branch.branch_id))
            .cloned()
            .collect();
        let Some(branches) = NonEmpty::from_vec(branches) else {
            return;
        };

        let decision_id = DecisionId::new();
        self.ongoing_decision_id = Some(decision_id);

        let store = filter_store(&self.store, branches.iter());
        out.push(Output::now(DecisionDispatched {
            message_id: MessageId::new(),
            decision_id,
            workflow_id: self.workflow_id,
            decision_name: DecisionName::from(&self.workflow_name),
            decision_data: DecisionInput {
                workflow_id: self.workflow_id,
                workflow_name: self.workflow_name.clone(),
                branches,
                store,
            },
        }));
    }

    fn finalize(&mut self, output: SerializedData, out: &mut Vec<Output>) {
        debug!(workflow_id = %self.workflow_id, "Workflow completed");
        if let Some(parent_workflow_id) = self.parent_workflow_id {
            out.push(Output::now(WorkflowMessage::ChildWorkflowCompleted {
                message_id: MessageId::new(),
                workflow_id: parent_workflow_id,
                child_workflow_id: self.workflow_id,
                child_workflow_output: output,
            }));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Running,
    Finalized,
}

/// State machine for [`WorkflowState`].
pub struct WorkflowEngine;

impl StateMachine for WorkflowEngine {
    type Message = WorkflowMessage;
    type State = WorkflowState;

    const NAME: &'static str = "workflow-engine";

    fn is_start(message: &Self::Message) -> bool {
        matches!(message, WorkflowMessage::WorkflowDispatched { .. })
    }

    fn initial_state(message: &Self::Message) -> Option<Self::State> {
        match message {
            WorkflowMessage::WorkflowDispatched {
                message_id,
                workflow_id,
                workflow_name,
                parent_workflow_id,
                ..
            } => Some(WorkflowState::new(
                *message_id,
                *workflow_id,
                workflow_name.clone(),
                *parent_workflow_id,
            )),
            _ => None,
        }
    }

    fn state_id(state: &Self::State) -> String {
        state.workflow_id.to_string()
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

        let flow = match message {
            WorkflowMessage::WorkflowDispatched { workflow_data, .. } => {
                if !ctx.created {
                    return Transition::reject("workflow already started");
                }
                state.start(workflow_data, &mut out);
                Flow::Running
            }
            WorkflowMessage::DecisionCompleted {
                decision_id,
                decision_output,
                ..
            } => {
                if state.ongoing_decision_id != Some(decision_id) {
                    return Transition::reject("decision id does not match the ongoing decision");
                }
                state.ongoing_decision_id = None;
                state.apply_decision(decision_output, &mut out)
            }
            message if state.ongoing_decision_id.is_some() => {
                state.buffer(message);
                Flow::Running
            }
            message => state.apply(ctx, message, &mut out),
        };

        let flow = match flow {
            Flow::Running => state.drain(ctx, &mut out),
            Flow::Finalized => Flow::Finalized,
        };

        match flow {
            Flow::Running => Transition::keep(state).with_outputs(out),
            Flow::Finalized => Transition::terminate().with_outputs(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TaskData;
    use crate::engine::{Discard, Engine, Handled};
    use crate::messages::{Message, Topic};
    use crate::store::MemoryStore;
    use crate::transport::RecordingDispatcher;
    use serde_json::json;

    type Workflows = Engine<WorkflowEngine, MemoryStore, RecordingDispatcher>;

    fn engine() -> (Workflows, RecordingDispatcher) {
        let dispatcher = RecordingDispatcher::new();
        (Engine::new(MemoryStore::new(), dispatcher.clone()), dispatcher)
    }

    fn data(value: serde_json::Value) -> SerializedData {
        SerializedData::from(value)
    }

    fn decisions(dispatcher: &RecordingDispatcher) -> Vec<DecisionDispatched> {
        dispatcher
            .messages_to(Topic::DecisionExecutor)
            .into_iter()
            .filter_map(|message| match message {
                Message::Decision(decision) => Some(decision),
                _ => None,
            })
            .collect()
    }

    fn last_decision(dispatcher: &RecordingDispatcher) -> DecisionDispatched {
        decisions(dispatcher).pop().unwrap()
    }

    async fn dispatch(engine: &Workflows, name: &str, input: serde_json::Value) -> WorkflowId {
        let workflow_id = WorkflowId::new();
        engine
            .handle(WorkflowMessage::WorkflowDispatched {
                message_id: MessageId::new(),
                workflow_id,
                workflow_name: name.into(),
                workflow_data: data(input),
                parent_workflow_id: None,
            })
            .await
            .unwrap();
        workflow_id
    }

    async fn decide(
        engine: &Workflows,
        decision: &DecisionDispatched,
        output: DecisionOutput,
    ) -> Handled {
        engine
            .handle(WorkflowMessage::DecisionCompleted {
                message_id: MessageId::new(),
                workflow_id: decision.workflow_id,
                decision_id: decision.decision_id,
                decision_output: output,
            })
            .await
            .unwrap()
    }

    fn event(workflow_id: WorkflowId, name: &str) -> WorkflowMessage {
        WorkflowMessage::EventReceived {
            message_id: MessageId::new(),
            workflow_id,
            event_name: name.into(),
            event_data: data(json!(name)),
        }
    }

    async fn state(engine: &Workflows, workflow_id: WorkflowId) -> Option<WorkflowState> {
        engine.state(&workflow_id.to_string()).await.unwrap()
    }

    /// A root branch waiting for events `a`, `b` and `c`, with no decision outstanding.
    async fn waiting_for_events(
        engine: &Workflows,
        dispatcher: &RecordingDispatcher,
    ) -> (WorkflowId, BranchId) {
        let workflow_id = dispatch(engine, "events", json!(null)).await;
        let first = last_decision(dispatcher);
        let root = first.decision_data.branches.head.branch_id;
        decide(
            engine,
            &first,
            DecisionOutput::new().with_branch(
                BranchDecision::for_branch(root)
                    .await_event("a")
                    .await_event("b")
                    .await_event("c"),
            ),
        )
        .await;
        (workflow_id, root)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    #[tokio::test]
    async fn dispatch_issues_one_decision_with_filtered_store() {
        let (engine, dispatcher) = engine();
        let input = data(json!({"order": 17}));

        let workflow_id = dispatch(&engine, "Seq", input.as_value().clone()).await;

        let state = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state.running_branches.len(), 1);
        assert!(state.ongoing_decision_id.is_some());

        let messages = dispatcher.messages();
        assert_eq!(messages.len(), 1);
        let decision = last_decision(&dispatcher);
        assert_eq!(decision.workflow_id, workflow_id);
        assert_eq!(decision.decision_name.as_str(), "Seq");
        assert_eq!(Some(decision.decision_id), state.ongoing_decision_id);
        assert_eq!(decision.decision_data.store.len(), 1);
        assert!(decision.decision_data.store.contains(&input.content_hash()));
    }

    #[tokio::test]
    async fn decision_sees_branch_input() {
        let (engine, dispatcher) = engine();
        dispatch(&engine, "Seq", json!({"n": 3})).await;

        let decision = last_decision(&dispatcher);
        let input = &decision.decision_data;
        let value: Option<serde_json::Value> = input.branch_input(&input.branches.head).unwrap();

        assert_eq!(value, Some(json!({"n": 3})));
        assert!(input.branches.head.is_root());
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    #[tokio::test]
    async fn decision_dispatches_task_and_clears_ongoing() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;

        let handled = decide(
            &engine,
            &decision,
            DecisionOutput::new().with_branch(
                BranchDecision::for_branch(root).dispatch_task("email", TaskData::new("send")),
            ),
        )
        .await;

        assert_eq!(handled, Handled::Applied);
        let state = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state.ongoing_decision_id, None);
        let steps = &state.running_branches[0].steps;
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_ongoing());

        let tasks = dispatcher.messages_to(Topic::TaskEngine);
        assert_eq!(tasks.len(), 1);
        let Message::TaskEngine(TaskEngineMessage::TaskDispatched {
            task_id,
            workflow_id: parent,
            ..
        }) = &tasks[0]
        else {
            panic!("expected TaskDispatched, got {:?}", tasks[0]);
        };
        assert_eq!(*parent, Some(workflow_id));
        assert!(matches!(
            steps[0].command,
            Command::DispatchTask { task_id: id, .. } if id == *task_id
        ));
    }

    #[tokio::test]
    async fn task_completion_triggers_decision_with_output() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;
        decide(
            &engine,
            &decision,
            DecisionOutput::new().with_branch(
                BranchDecision::for_branch(root)
                    .with_property("customer", data(json!("ada")))
                    .dispatch_task("email", TaskData::new("send")),
            ),
        )
        .await;
        let state_before = state(&engine, workflow_id).await.unwrap();
        let Command::DispatchTask { task_id, .. } =
            state_before.running_branches[0].steps[0].command.clone()
        else {
            panic!("expected a task step");
        };

        engine
            .handle(WorkflowMessage::TaskCompleted {
                message_id: MessageId::new(),
                workflow_id,
                task_id,
                task_output: data(json!("sent")),
            })
            .await
            .unwrap();

        let decision = last_decision(&dispatcher);
        let input = &decision.decision_data;
        let step = &input.branches.head.steps[0];
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(input.step_output::<String>(step).unwrap().as_deref(), Some("sent"));
        let customer: Option<String> = input.property(&input.branches.head, "customer").unwrap();
        assert_eq!(customer.as_deref(), Some("ada"));
        // input, customer, task output
        assert_eq!(input.store.len(), 3);
    }

    #[tokio::test]
    async fn mismatched_decision_is_rejected() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let before = state(&engine, workflow_id).await;

        let handled = engine
            .handle(WorkflowMessage::DecisionCompleted {
                message_id: MessageId::new(),
                workflow_id,
                decision_id: DecisionId::new(),
                decision_output: DecisionOutput::new(),
            })
            .await
            .unwrap();

        assert_eq!(handled, Handled::Discarded(Discard::Rejected));
        assert_eq!(state(&engine, workflow_id).await, before);
        assert_eq!(dispatcher.messages().len(), 1);
    }

    #[tokio::test]
    async fn timer_is_scheduled_as_delayed_message() {
        let (engine, dispatcher) = engine();
        dispatch(&engine, "Seq", json!(1)).await;
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;

        decide(
            &engine,
            &decision,
            DecisionOutput::new().with_branch(BranchDecision::for_branch(root).start_timer(2.5)),
        )
        .await;

        let timer = dispatcher
            .dispatched()
            .into_iter()
            .find(|d| {
                matches!(
                    d.message,
                    Message::Workflow(WorkflowMessage::TimerCompleted { .. })
                )
            })
            .unwrap();
        assert_eq!(timer.after, Some(Duration::from_millis(2500)));
    }

    // =========================================================================
    // Buffering
    // =========================================================================

    #[tokio::test]
    async fn messages_during_decision_are_buffered_and_replayed_in_order() {
        let (engine, dispatcher) = engine();
        let (workflow_id, _) = waiting_for_events(&engine, &dispatcher).await;

        engine.handle(event(workflow_id, "a")).await.unwrap();
        let decision_a = last_decision(&dispatcher);
        engine.handle(event(workflow_id, "b")).await.unwrap();
        engine.handle(event(workflow_id, "c")).await.unwrap();

        let buffered = state(&engine, workflow_id).await.unwrap().buffered_messages;
        let names: Vec<_> = buffered
            .iter()
            .map(|m| match m {
                WorkflowMessage::EventReceived { event_name, .. } => event_name.to_string(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["b", "c"]);
        // Only the decision for `a` is outstanding.
        assert_eq!(decisions(&dispatcher).len(), 2);

        decide(&engine, &decision_a, DecisionOutput::new()).await;
        let state_after_a = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state_after_a.buffered_messages.len(), 1);
        let decision_b = last_decision(&dispatcher);
        let completed: Vec<_> = decision_b
            .decision_data
            .branches
            .head
            .steps
            .iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(
            completed,
            [StepStatus::Completed, StepStatus::Completed, StepStatus::Ongoing]
        );

        decide(&engine, &decision_b, DecisionOutput::new()).await;
        let state_after_b = state(&engine, workflow_id).await.unwrap();
        assert!(state_after_b.buffered_messages.is_empty());
        let steps = &last_decision(&dispatcher).decision_data.branches.head.steps;
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn later_message_queues_behind_buffered_ones() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "events", json!(null)).await;
        let first = last_decision(&dispatcher);
        let root = first.decision_data.branches.head.branch_id;
        let mut waiting = BranchDecision::for_branch(root);
        for name in ["a", "b", "c", "d"] {
            waiting = waiting.await_event(name);
        }
        decide(&engine, &first, DecisionOutput::new().with_branch(waiting)).await;

        engine.handle(event(workflow_id, "a")).await.unwrap();
        let decision_a = last_decision(&dispatcher);
        engine.handle(event(workflow_id, "b")).await.unwrap();
        engine.handle(event(workflow_id, "c")).await.unwrap();
        decide(&engine, &decision_a, DecisionOutput::new()).await;
        let decision_b = last_decision(&dispatcher);

        engine.handle(event(workflow_id, "d")).await.unwrap();

        let buffered: Vec<_> = state(&engine, workflow_id)
            .await
            .unwrap()
            .buffered_messages
            .iter()
            .map(|m| match m {
                WorkflowMessage::EventReceived { event_name, .. } => event_name.to_string(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(buffered, ["c", "d"]);

        decide(&engine, &decision_b, DecisionOutput::new()).await;
        let decision_c = last_decision(&dispatcher);
        let statuses: Vec<_> = decision_c
            .decision_data
            .branches
            .head
            .steps
            .iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(
            statuses,
            [
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::Ongoing
            ]
        );

        decide(&engine, &decision_c, DecisionOutput::new()).await;
        let decision_d = last_decision(&dispatcher);
        let steps = &decision_d.decision_data.branches.head.steps;
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(state(&engine, workflow_id).await.unwrap().buffered_messages.is_empty());
    }

    #[tokio::test]
    async fn no_second_decision_while_one_is_outstanding() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;

        for name in ["x", "y", "z"] {
            engine.handle(event(workflow_id, name)).await.unwrap();
        }

        assert_eq!(decisions(&dispatcher).len(), 1);
        let state = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state.buffered_messages.len(), 3);
    }

    #[tokio::test]
    async fn redelivered_buffered_message_is_kept_once() {
        let (engine, _) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let first = event(workflow_id, "x");

        engine.handle(first.clone()).await.unwrap();
        engine.handle(event(workflow_id, "y")).await.unwrap();
        engine.handle(first).await.unwrap();

        let state = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state.buffered_messages.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_completion_is_dropped() {
        let (engine, dispatcher) = engine();
        let (workflow_id, _) = waiting_for_events(&engine, &dispatcher).await;
        let decisions_before = decisions(&dispatcher).len();

        engine.handle(event(workflow_id, "unknown")).await.unwrap();

        assert_eq!(decisions(&dispatcher).len(), decisions_before);
        assert_eq!(state(&engine, workflow_id).await.unwrap().ongoing_decision_id, None);
    }

    // =========================================================================
    // Branches
    // =========================================================================

    #[tokio::test]
    async fn forked_branch_reports_back_to_parent() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Fan", json!(1)).await;
        let first = last_decision(&dispatcher);
        let root = first.decision_data.branches.head.branch_id;

        decide(
            &engine,
            &first,
            DecisionOutput::new().with_branch(
                BranchDecision::for_branch(root).with_new_branch("side", data(json!(5))),
            ),
        )
        .await;

        let fork = last_decision(&dispatcher);
        assert_eq!(fork.decision_data.branches.len(), 1);
        let side = fork.decision_data.branches.head.clone();
        assert_eq!(side.parent_branch_id, Some(root));
        assert_eq!(fork.decision_data.branch_input::<u32>(&side).unwrap(), Some(5));

        decide(
            &engine,
            &fork,
            DecisionOutput::new()
                .with_branch(BranchDecision::for_branch(side.branch_id).complete(data(json!(10)))),
        )
        .await;

        let join = last_decision(&dispatcher);
        let parent = &join.decision_data.branches.head;
        assert_eq!(parent.branch_id, root);
        let step = parent.steps.last().unwrap();
        assert!(matches!(
            step.command,
            Command::AwaitBranch { branch_id, .. } if branch_id == side.branch_id
        ));
        assert_eq!(join.decision_data.step_output::<u32>(step).unwrap(), Some(10));
        assert_eq!(join.decision_data.property::<u32>(parent, "$side").unwrap(), Some(10));

        let state = state(&engine, workflow_id).await.unwrap();
        assert_eq!(state.running_branches.len(), 1);
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    #[tokio::test]
    async fn completing_root_branch_removes_state() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;

        decide(
            &engine,
            &decision,
            DecisionOutput::new()
                .with_branch(BranchDecision::for_branch(root).complete(data(json!("done")))),
        )
        .await;

        assert_eq!(state(&engine, workflow_id).await, None);
        dispatcher.take();

        let handled = engine.handle(event(workflow_id, "late")).await.unwrap();
        assert_eq!(handled, Handled::Discarded(Discard::NoState));
        assert!(dispatcher.is_empty());
        assert_eq!(state(&engine, workflow_id).await, None);
    }

    #[tokio::test]
    async fn child_workflow_reports_to_parent() {
        let (engine, dispatcher) = engine();
        let parent_id = WorkflowId::new();
        let child_id = WorkflowId::new();
        engine
            .handle(WorkflowMessage::WorkflowDispatched {
                message_id: MessageId::new(),
                workflow_id: child_id,
                workflow_name: "child".into(),
                workflow_data: SerializedData::null(),
                parent_workflow_id: Some(parent_id),
            })
            .await
            .unwrap();
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;

        decide(
            &engine,
            &decision,
            DecisionOutput::new()
                .with_branch(BranchDecision::for_branch(root).complete(data(json!(42)))),
        )
        .await;
        let late = engine
            .handle(WorkflowMessage::WorkflowCompleted {
                message_id: MessageId::new(),
                workflow_id: child_id,
                workflow_output: data(json!(0)),
            })
            .await
            .unwrap();

        assert_eq!(late, Handled::Discarded(Discard::NoState));
        let completions: Vec<_> = dispatcher
            .messages_to(Topic::WorkflowEngine)
            .into_iter()
            .filter(|m| {
                matches!(
                    m,
                    Message::Workflow(WorkflowMessage::ChildWorkflowCompleted { .. })
                )
            })
            .collect();
        assert_eq!(completions.len(), 1);
        let Message::Workflow(WorkflowMessage::ChildWorkflowCompleted {
            workflow_id,
            child_workflow_id,
            child_workflow_output,
            ..
        }) = &completions[0]
        else {
            unreachable!()
        };
        assert_eq!(*workflow_id, parent_id);
        assert_eq!(*child_workflow_id, child_id);
        assert_eq!(child_workflow_output, &data(json!(42)));
    }

    #[tokio::test]
    async fn workflow_completed_waits_for_outstanding_decision() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Seq", json!(1)).await;
        let decision = last_decision(&dispatcher);

        engine
            .handle(WorkflowMessage::WorkflowCompleted {
                message_id: MessageId::new(),
                workflow_id,
                workflow_output: SerializedData::null(),
            })
            .await
            .unwrap();
        assert!(state(&engine, workflow_id).await.is_some());

        decide(&engine, &decision, DecisionOutput::new()).await;

        assert_eq!(state(&engine, workflow_id).await, None);
    }

    #[tokio::test]
    async fn child_workflow_step_completes_on_child_output() {
        let (engine, dispatcher) = engine();
        let workflow_id = dispatch(&engine, "Parent", json!(1)).await;
        let decision = last_decision(&dispatcher);
        let root = decision.decision_data.branches.head.branch_id;

        decide(
            &engine,
            &decision,
            DecisionOutput::new().with_branch(
                BranchDecision::for_branch(root)
                    .dispatch_child_workflow("Child", data(json!("in"))),
            ),
        )
        .await;
        let child = dispatcher
            .messages_to(Topic::WorkflowEngine)
            .into_iter()
            .find_map(|m| match m {
                Message::Workflow(WorkflowMessage::WorkflowDispatched {
                    workflow_id,
                    parent_workflow_id,
                    ..
                }) => Some((workflow_id, parent_workflow_id)),
                _ => None,
            })
            .unwrap();
        assert_eq!(child.1, Some(workflow_id));

        engine
            .handle(WorkflowMessage::ChildWorkflowCompleted {
                message_id: MessageId::new(),
                workflow_id,
                child_workflow_id: child.0,
                child_workflow_output: data(json!("out")),
            })
            .await
            .unwrap();

        let decision = last_decision(&dispatcher);
        let step = &decision.decision_data.branches.head.steps[0];
        assert_eq!(
            decision.decision_data.step_output::<String>(step).unwrap().as_deref(),
            Some("out")
        );
    }
}
