//! Workflow code: the decisions that drive a workflow's branches.
//!
//! The workflow engine never runs workflow code itself. It sends a
//! [`DecisionInput`] (the branches that need attention plus the property
//! values they reference) and applies the [`DecisionOutput`] that comes back.

mod branch;
mod decision;

pub use branch::{
    Branch, Command, Completion, INPUT_PROPERTY, OUTPUT_PROPERTY, Properties, PropertyStore, Step,
    StepStatus, filter_store,
};
pub(crate) use decision::{branch_output_property, input_property};
pub use decision::{BranchDecision, DecisionInput, DecisionOutput, NewBranch, NewCommand};

/// Workflow logic: decide what the branches of a workflow do next.
///
/// `decide` must be deterministic and side-effect free. Side effects are
/// requested as commands in the returned [`DecisionOutput`].
///
/// # Example
///
/// ```ignore
/// struct Greeting;
///
/// impl Workflow for Greeting {
///     const NAME: &'static str = "greeting";
///     type Error = tideflow::Error;
///
///     fn decide(&self, input: &DecisionInput) -> Result<DecisionOutput, Self::Error> {
///         let branch = input.branches.first();
///         let decision = match branch.steps.last() {
///             None => {
///                 let name: String = input.branch_input(branch)?.unwrap_or_default();
///                 let mut call = CallCapture::begin("greeter");
///                 call.call::<_, ()>("greet", (name,))?;
///                 BranchDecision::for_branch(branch.branch_id)
///                     .dispatch_task("greeter", call.take()?.task_data(Default::default(), Default::default()))
///             }
///             Some(step) => BranchDecision::for_branch(branch.branch_id)
///                 .complete(input.step_output::<serde_json::Value>(step)?.unwrap_or_default().into()),
///         };
///         Ok(DecisionOutput::new().with_branch(decision))
///     }
/// }
/// ```
pub trait Workflow: Send + Sync + 'static {
    /// Workflow name. Must be stable across deployments.
    const NAME: &'static str;

    /// Error returned when a decision cannot be computed.
    type Error: std::fmt::Display + Send;

    /// Decide the next actions for the branches in `input`.
    fn decide(&self, input: &DecisionInput) -> Result<DecisionOutput, Self::Error>;
}
