use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use super::Dispatcher;
use crate::Envelope;
use crate::messages::{
    DecisionDispatched, Message, MonitoringGlobalMessage, MonitoringPerNameMessage,
    TaskEngineMessage, TaskExecutorMessage, WorkflowMessage,
};

#[derive(Debug)]
struct Senders {
    workflow: UnboundedSender<WorkflowMessage>,
    decision: UnboundedSender<DecisionDispatched>,
    task_engine: UnboundedSender<TaskEngineMessage>,
    task_executor: UnboundedSender<TaskExecutorMessage>,
    monitoring_per_name: UnboundedSender<MonitoringPerNameMessage>,
    monitoring_global: UnboundedSender<MonitoringGlobalMessage>,
}

/// Consuming ends of a [`ChannelDispatcher`], one per topic.
#[derive(Debug)]
pub struct Receivers {
    pub workflow: UnboundedReceiver<WorkflowMessage>,
    pub decision: UnboundedReceiver<DecisionDispatched>,
    pub task_engine: UnboundedReceiver<TaskEngineMessage>,
    pub task_executor: UnboundedReceiver<TaskExecutorMessage>,
    pub monitoring_per_name: UnboundedReceiver<MonitoringPerNameMessage>,
    pub monitoring_global: UnboundedReceiver<MonitoringGlobalMessage>,
}

/// In-process transport: one unbounded tokio channel per topic.
///
/// Delayed messages are held by a spawned task, never by the sender.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    senders: Arc<Senders>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receivers it feeds.
    pub fn new() -> (Self, Receivers) {
        let (workflow_tx, workflow_rx) = unbounded_channel();
        let (decision_tx, decision_rx) = unbounded_channel();
        let (task_engine_tx, task_engine_rx) = unbounded_channel();
        let (task_executor_tx, task_executor_rx) = unbounded_channel();
        let (per_name_tx, per_name_rx) = unbounded_channel();
        let (global_tx, global_rx) = unbounded_channel();

        let dispatcher = Self {
            senders: Arc::new(Senders {
                workflow: workflow_tx,
                decision: decision_tx,
                task_engine: task_engine_tx,
                task_executor: task_executor_tx,
                monitoring_per_name: per_name_tx,
                monitoring_global: global_tx,
            }),
        };

        let receivers = Receivers {
            workflow: workflow_rx,
            decision: decision_rx,
            task_engine: task_engine_rx,
            task_executor: task_executor_rx,
            monitoring_per_name: per_name_rx,
            monitoring_global: global_rx,
        };

        (dispatcher, receivers)
    }

    fn deliver(senders: &Senders, message: Message) {
        let topic = message.topic();
        let kind = message.kind();
        let delivered = match message {
            Message::Workflow(m) => senders.workflow.send(m).is_ok(),
            Message::Decision(m) => senders.decision.send(m).is_ok(),
            Message::TaskEngine(m) => senders.task_engine.send(m).is_ok(),
            Message::TaskExecutor(m) => senders.task_executor.send(m).is_ok(),
            Message::MonitoringPerName(m) => senders.monitoring_per_name.send(m).is_ok(),
            Message::MonitoringGlobal(m) => senders.monitoring_global.send(m).is_ok(),
        };

        if !delivered {
            debug!(%topic, kind, "Topic closed, message dropped");
        }
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, message: Message, after: Option<Duration>) {
        let Some(delay) = after.filter(|delay| !delay.is_zero()) else {
            Self::deliver(&self.senders, message);
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                topic = %message.topic(),
                kind = message.kind(),
                "No runtime to schedule delayed message, dropped"
            );
            return;
        };

        let senders = Arc::clone(&self.senders);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            Self::deliver(&senders, message);
        });
    }
}
