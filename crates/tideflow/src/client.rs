//! Client API: start and steer tasks and workflows from outside the engines.

use serde::Serialize;
use tracing::info;

use crate::capture::CallCapture;
use crate::data::{SerializedData, TaskMeta, TaskOptions};
use crate::error::Result;
use crate::id::{EventName, MessageId, TaskId, WorkflowId, WorkflowName};
use crate::messages::{TaskEngineMessage, WorkflowMessage};
use crate::transport::Dispatcher;

/// Sends commands to the engines through a [`Dispatcher`].
///
/// Every method only sends a message: the returned id can be used to address
/// the task or workflow later, but the engines apply the message on their own
/// schedule.
///
/// # Example
///
/// ```ignore
/// let client = Client::new(runtime.dispatcher());
///
/// let mut email = CallCapture::begin("email");
/// email.call::<_, bool>("send", ("ada@example.com".to_string(),))?;
/// let task_id = client.dispatch_task(email, TaskOptions::default(), TaskMeta::new())?;
///
/// let workflow_id = client.dispatch_workflow("onboarding", &user)?;
/// client.send_event(workflow_id, "email_confirmed", &true)?;
/// ```
#[derive(Debug, Clone)]
pub struct Client<D> {
    dispatcher: D,
}

impl<D: Dispatcher> Client<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    /// Dispatch the call recorded by `capture` as a new task.
    pub fn dispatch_task(
        &self,
        mut capture: CallCapture,
        task_options: TaskOptions,
        task_meta: TaskMeta,
    ) -> Result<TaskId> {
        let call = capture.take()?;
        let task_id = TaskId::new();
        let task_name = call.task_name.clone();

        info!(%task_name, %task_id, method = %call.method_name, "Dispatching task");
        self.dispatcher.send(TaskEngineMessage::TaskDispatched {
            message_id: MessageId::new(),
            task_id,
            task_name,
            task_data: call.task_data(task_options, task_meta),
            workflow_id: None,
        });
        Ok(task_id)
    }

    /// Start a workflow with `input`.
    pub fn dispatch_workflow<T: Serialize + ?Sized>(
        &self,
        workflow_name: impl Into<WorkflowName>,
        input: &T,
    ) -> Result<WorkflowId> {
        let workflow_id = WorkflowId::new();
        let workflow_name = workflow_name.into();

        info!(%workflow_name, %workflow_id, "Dispatching workflow");
        self.dispatcher.send(WorkflowMessage::WorkflowDispatched {
            message_id: MessageId::new(),
            workflow_id,
            workflow_name,
            workflow_data: SerializedData::encode(input)?,
            parent_workflow_id: None,
        });
        Ok(workflow_id)
    }

    /// Deliver an event to a workflow waiting for it.
    pub fn send_event<T: Serialize + ?Sized>(
        &self,
        workflow_id: WorkflowId,
        event_name: impl Into<EventName>,
        data: &T,
    ) -> Result<()> {
        self.dispatcher.send(WorkflowMessage::EventReceived {
            message_id: MessageId::new(),
            workflow_id,
            event_name: event_name.into(),
            event_data: SerializedData::encode(data)?,
        });
        Ok(())
    }

    /// Cancel a task. A waiting workflow receives `output` as the task result.
    pub fn cancel_task<T: Serialize + ?Sized>(&self, task_id: TaskId, output: &T) -> Result<()> {
        self.dispatcher.send(TaskEngineMessage::CancelTask {
            message_id: MessageId::new(),
            task_id,
            task_output: SerializedData::encode(output)?,
        });
        Ok(())
    }

    /// Start a new retry cycle for a task.
    pub fn retry_task(&self, task_id: TaskId) {
        self.dispatcher.send(TaskEngineMessage::RetryTask {
            message_id: MessageId::new(),
            task_id,
        });
    }

    /// Complete a workflow from outside with `output`.
    pub fn complete_workflow<T: Serialize + ?Sized>(
        &self,
        workflow_id: WorkflowId,
        output: &T,
    ) -> Result<()> {
        self.dispatcher.send(WorkflowMessage::WorkflowCompleted {
            message_id: MessageId::new(),
            workflow_id,
            workflow_output: SerializedData::encode(output)?,
        });
        Ok(())
    }
}
