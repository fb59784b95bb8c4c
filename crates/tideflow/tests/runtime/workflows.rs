//! Workflows driving tasks, events, branches, and child workflows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tideflow::workflow::{Branch, Command, Step};
use tideflow::{
    BranchDecision, CallCapture, DecisionInput, DecisionOutput, MemoryStore, Runtime,
    SerializedData, Task, TaskError, TaskMeta, TaskOptions, Workflow,
};

use crate::support::{Running, eventually};

/// Outputs of completed workflows, recorded by the workflows themselves.
type Outputs = Arc<Mutex<Vec<Value>>>;

fn finish(outputs: &Outputs, branch: &Branch, output: Value) -> tideflow::Result<BranchDecision> {
    outputs.lock().unwrap().push(output.clone());
    Ok(BranchDecision::for_branch(branch.branch_id).complete(SerializedData::from(output)))
}

async fn wait_for_output(outputs: &Outputs) -> anyhow::Result<Value> {
    eventually("workflow output", || async {
        Ok(outputs.lock().unwrap().first().cloned())
    })
    .await
}

/// Greets its input through the `greeter` task.
struct Greeting {
    outputs: Outputs,
}

impl Workflow for Greeting {
    const NAME: &'static str = "greeting";
    type Error = tideflow::Error;

    fn decide(&self, input: &DecisionInput) -> tideflow::Result<DecisionOutput> {
        let branch = input.branches.first();
        let decision = match branch.steps.last() {
            None => {
                let name: String = input.branch_input(branch)?.unwrap_or_default();
                let mut call = CallCapture::begin("greeter");
                call.call::<_, String>("greet", (name,))?;
                let task_data = call.take()?.task_data(TaskOptions::default(), TaskMeta::new());
                BranchDecision::for_branch(branch.branch_id).dispatch_task("greeter", task_data)
            }
            Some(step) => {
                let greeting: Value = input.step_output(step)?.unwrap_or_default();
                finish(&self.outputs, branch, greeting)?
            }
        };
        Ok(DecisionOutput::new().with_branch(decision))
    }
}

/// Waits for an `approved` event and completes with its payload.
struct Approval {
    outputs: Outputs,
}

impl Workflow for Approval {
    const NAME: &'static str = "approval";
    type Error = tideflow::Error;

    fn decide(&self, input: &DecisionInput) -> tideflow::Result<DecisionOutput> {
        let branch = input.branches.first();
        let decision = match branch.steps.last() {
            None => BranchDecision::for_branch(branch.branch_id).await_event("approved"),
            Some(step) => {
                let approval: Value = input.step_output(step)?.unwrap_or_default();
                finish(&self.outputs, branch, approval)?
            }
        };
        Ok(DecisionOutput::new().with_branch(decision))
    }
}

/// Doubles two numbers on parallel branches and sums the results.
struct FanOut {
    outputs: Outputs,
}

impl FanOut {
    fn decide_root(
        &self,
        input: &DecisionInput,
        root: &Branch,
    ) -> tideflow::Result<Option<BranchDecision>> {
        if root.steps.is_empty() {
            let numbers: Vec<i64> = input.branch_input(root)?.unwrap_or_default();
            let mut decision = BranchDecision::for_branch(root.branch_id);
            for (name, number) in ["left", "right"].into_iter().zip(numbers) {
                decision = decision.with_new_branch(name, SerializedData::encode(&number)?);
            }
            return Ok(Some(decision));
        }
        if root.steps.iter().any(Step::is_ongoing) {
            return Ok(None);
        }

        let mut sum = 0;
        for step in &root.steps {
            sum += input.step_output::<i64>(step)?.unwrap_or_default();
        }
        finish(&self.outputs, root, json!(sum)).map(Some)
    }
}

impl Workflow for FanOut {
    const NAME: &'static str = "fan-out";
    type Error = tideflow::Error;

    fn decide(&self, input: &DecisionInput) -> tideflow::Result<DecisionOutput> {
        let mut output = DecisionOutput::new();
        for branch in input.branches.iter() {
            if branch.is_root() {
                if let Some(decision) = self.decide_root(input, branch)? {
                    output = output.with_branch(decision);
                }
                continue;
            }
            let number: i64 = input.branch_input(branch)?.unwrap_or_default();
            let doubled = SerializedData::encode(&(number * 2))?;
            output =
                output.with_branch(BranchDecision::for_branch(branch.branch_id).complete(doubled));
        }
        Ok(output)
    }
}

/// Completes with its input.
struct Echo;

impl Workflow for Echo {
    const NAME: &'static str = "echo";
    type Error = tideflow::Error;

    fn decide(&self, input: &DecisionInput) -> tideflow::Result<DecisionOutput> {
        let branch = input.branches.first();
        let value: Value = input.branch_input(branch)?.unwrap_or_default();
        Ok(DecisionOutput::new()
            .with_branch(BranchDecision::for_branch(branch.branch_id).complete(value.into())))
    }
}

/// Runs `echo` as a child workflow and completes with the child's output.
struct Relay {
    outputs: Outputs,
}

impl Workflow for Relay {
    const NAME: &'static str = "relay";
    type Error = tideflow::Error;

    fn decide(&self, input: &DecisionInput) -> tideflow::Result<DecisionOutput> {
        let branch = input.branches.first();
        let decision = match branch.steps.last() {
            None => {
                let value: Value = input.branch_input(branch)?.unwrap_or_default();
                BranchDecision::for_branch(branch.branch_id)
                    .dispatch_child_workflow(Echo::NAME, value.into())
            }
            Some(step) => {
                assert!(matches!(step.command, Command::DispatchChildWorkflow { .. }));
                let echoed: Value = input.step_output(step)?.unwrap_or_default();
                finish(&self.outputs, branch, echoed)?
            }
        };
        Ok(DecisionOutput::new().with_branch(decision))
    }
}

/// Fails its first decision, then completes with its input.
struct Hesitant {
    failed_once: AtomicBool,
    outputs: Outputs,
}

impl Workflow for Hesitant {
    const NAME: &'static str = "hesitant";
    type Error = String;

    fn decide(&self, input: &DecisionInput) -> Result<DecisionOutput, String> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err("not ready yet".to_string());
        }
        let branch = input.branches.first();
        let value: Value = input
            .branch_input(branch)
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        let decision = finish(&self.outputs, branch, value).map_err(|e| e.to_string())?;
        Ok(DecisionOutput::new().with_branch(decision))
    }
}

fn greeter() -> Task {
    Task::new().method("greet", |_ctx, (name,): (String,)| async move {
        Ok::<_, TaskError>(format!("hello {name}"))
    })
}

// =============================================================================
// Tasks
// =============================================================================

#[tokio::test]
async fn workflow_runs_task_and_completes() -> anyhow::Result<()> {
    let outputs = Outputs::default();
    let running = Running::start(
        Runtime::builder(MemoryStore::new())
            .task("greeter", greeter())
            .workflow(Greeting {
                outputs: Arc::clone(&outputs),
            }),
    )?;

    let workflow_id = running.handle.client().dispatch_workflow(Greeting::NAME, "ada")?;

    assert_eq!(wait_for_output(&outputs).await?, json!("hello ada"));
    eventually("workflow state to be removed", || async {
        Ok(running.handle.workflow_state(workflow_id).await?.is_none().then_some(()))
    })
    .await?;

    eventually("greeter to be counted", || async {
        let counts = running.handle.task_counts("greeter").await?;
        Ok(counts.filter(|counts| counts.terminated_completed == 1))
    })
    .await?;

    running.shutdown().await
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn workflow_waits_for_event() -> anyhow::Result<()> {
    let outputs = Outputs::default();
    let running = Running::start(Runtime::builder(MemoryStore::new()).workflow(Approval {
        outputs: Arc::clone(&outputs),
    }))?;
    let client = running.handle.client();

    let workflow_id = client.dispatch_workflow(Approval::NAME, &json!({"request": 7}))?;
    eventually("workflow to wait for the event", || async {
        let state = running.handle.workflow_state(workflow_id).await?;
        Ok(state.filter(|state| {
            state.ongoing_decision_id.is_none()
                && state.running_branches.iter().any(|branch| !branch.steps.is_empty())
        }))
    })
    .await?;
    assert!(outputs.lock().unwrap().is_empty());

    client.send_event(workflow_id, "approved", &json!({"by": "grace"}))?;

    assert_eq!(wait_for_output(&outputs).await?, json!({"by": "grace"}));

    running.shutdown().await
}

// =============================================================================
// Branches and child workflows
// =============================================================================

#[tokio::test]
async fn forked_branches_report_to_root() -> anyhow::Result<()> {
    let outputs = Outputs::default();
    let running = Running::start(Runtime::builder(MemoryStore::new()).workflow(FanOut {
        outputs: Arc::clone(&outputs),
    }))?;

    running.handle.client().dispatch_workflow(FanOut::NAME, &[3, 4])?;

    assert_eq!(wait_for_output(&outputs).await?, json!(14));

    running.shutdown().await
}

#[tokio::test]
async fn child_workflow_output_reaches_parent() -> anyhow::Result<()> {
    let outputs = Outputs::default();
    let running = Running::start(
        Runtime::builder(MemoryStore::new())
            .workflow(Echo)
            .workflow(Relay {
                outputs: Arc::clone(&outputs),
            }),
    )?;

    running.handle.client().dispatch_workflow(Relay::NAME, &json!(["a", "b"]))?;

    assert_eq!(wait_for_output(&outputs).await?, json!(["a", "b"]));

    running.shutdown().await
}

#[tokio::test]
async fn failed_decision_is_computed_again() -> anyhow::Result<()> {
    let outputs = Outputs::default();
    let running = Running::start(Runtime::builder(MemoryStore::new()).workflow(Hesitant {
        failed_once: AtomicBool::new(false),
        outputs: Arc::clone(&outputs),
    }))?;

    let workflow_id = running
        .handle
        .client()
        .dispatch_workflow(Hesitant::NAME, &json!("patience"))?;

    assert_eq!(wait_for_output(&outputs).await?, json!("patience"));
    eventually("workflow state to be removed", || async {
        Ok(running.handle.workflow_state(workflow_id).await?.is_none().then_some(()))
    })
    .await?;

    running.shutdown().await
}

#[test]
fn duplicate_workflow_fails_build() {
    let result = Runtime::builder(MemoryStore::new())
        .workflow(Echo)
        .workflow(Echo)
        .build();

    assert!(matches!(result, Err(tideflow::Error::DuplicateWorkflow(name)) if name == "echo"));
}
