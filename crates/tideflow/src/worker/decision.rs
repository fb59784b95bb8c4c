//! Decision executor: answers `DecisionDispatched` with workflow code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::id::{MessageId, WorkflowName};
use crate::messages::{DecisionDispatched, Message, WorkflowMessage};
use crate::transport::Dispatcher;
use crate::workflow::{DecisionInput, DecisionOutput, Workflow};

/// Type-erased workflow, so one registry can hold every workflow type.
trait WorkflowEntry: Send + Sync {
    fn decide(&self, input: &DecisionInput) -> std::result::Result<DecisionOutput, String>;
}

struct TypedWorkflowEntry<W>(W);

impl<W: Workflow> WorkflowEntry for TypedWorkflowEntry<W> {
    fn decide(&self, input: &DecisionInput) -> std::result::Result<DecisionOutput, String> {
        self.0.decide(input).map_err(|e| e.to_string())
    }
}

/// Maps workflow names to workflow code.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    entries: HashMap<WorkflowName, Arc<dyn WorkflowEntry>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow under [`Workflow::NAME`].
    pub fn register<W: Workflow>(&mut self, workflow: W) -> Result<()> {
        if self.entries.contains_key(W::NAME) {
            return Err(Error::DuplicateWorkflow(W::NAME.to_string()));
        }
        self.entries
            .insert(WorkflowName::from(W::NAME), Arc::new(TypedWorkflowEntry(workflow)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &WorkflowName> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Delay before a decision that could not be computed is dispatched again.
pub const DEFAULT_DECISION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs workflow decisions and reports them back to the workflow engine.
#[derive(Debug, Clone)]
pub struct DecisionWorker<D> {
    registry: Arc<WorkflowRegistry>,
    dispatcher: D,
    retry_delay: Duration,
}

impl<D: Dispatcher> DecisionWorker<D> {
    pub fn new(registry: WorkflowRegistry, dispatcher: D) -> Self {
        Self {
            registry: Arc::new(registry),
            dispatcher,
            retry_delay: DEFAULT_DECISION_RETRY_DELAY,
        }
    }

    /// Set the delay before a failed decision is dispatched again.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Compute the decision and send `DecisionCompleted`.
    ///
    /// When the workflow is unknown or its code fails, the same decision is
    /// dispatched again after the retry delay and the error is returned. The
    /// workflow keeps waiting for that decision meanwhile.
    pub fn handle(&self, message: DecisionDispatched) -> Result<()> {
        let decision_output = match self.decide(&message) {
            Ok(decision_output) => decision_output,
            Err(e) => {
                warn!(
                    workflow_id = %message.workflow_id,
                    decision_id = %message.decision_id,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "Retrying decision"
                );
                self.dispatcher.dispatch(Message::from(message), Some(self.retry_delay));
                return Err(e);
            }
        };

        let name = message.decision_name.as_str();

        info!(
            workflow_name = name,
            workflow_id = %message.workflow_id,
            decision_id = %message.decision_id,
            branches = decision_output.branches.len(),
            "Decision computed"
        );
        self.dispatcher.send(WorkflowMessage::DecisionCompleted {
            message_id: MessageId::new(),
            workflow_id: message.workflow_id,
            decision_id: message.decision_id,
            decision_output,
        });
        Ok(())
    }

    fn decide(&self, message: &DecisionDispatched) -> Result<DecisionOutput> {
        let name = message.decision_name.as_str();
        let Some(entry) = self.registry.entries.get(name) else {
            error!(
                workflow_name = name,
                workflow_id = %message.workflow_id,
                "Decision for an unregistered workflow"
            );
            return Err(Error::UnknownWorkflow(name.to_string()));
        };

        entry.decide(&message.decision_data).map_err(|reason| {
            error!(
                workflow_name = name,
                workflow_id = %message.workflow_id,
                decision_id = %message.decision_id,
                %reason,
                "Decision failed"
            );
            Error::DecisionFailed {
                workflow: name.to_string(),
                reason,
            }
        })
    }
}
