//! Message loops for the stateless workers.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::messages::{DecisionDispatched, TaskExecutorMessage};
use crate::transport::Dispatcher;
use crate::worker::{DecisionWorker, TaskExecutor};

/// Answer decisions until shutdown.
pub(crate) async fn run_decisions<D: Dispatcher>(
    worker: DecisionWorker<D>,
    mut inbox: UnboundedReceiver<DecisionDispatched>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(workflows = worker.registry().len(), "Decision worker started");

    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(message) = message else {
                    break;
                };
                if let Err(e) = worker.handle(message) {
                    error!(error = %e, "Error computing decision");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Decision worker shutting down");
                    break;
                }
            }
        }
    }
}

/// Run task attempts until shutdown, at most `concurrency` at once.
///
/// Attempts wait for a slot on their own task, so cancellations and the
/// shutdown signal are read while every slot is busy. On shutdown waiting
/// attempts never start; running ones are awaited.
pub(crate) async fn run_executor<D: Dispatcher>(
    executor: TaskExecutor<D>,
    mut inbox: UnboundedReceiver<TaskExecutorMessage>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut running = JoinSet::new();

    info!(
        tasks = executor.registry().len(),
        concurrency = concurrency.max(1),
        "Task executor started"
    );

    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    TaskExecutorMessage::ExecuteTaskAttempt(message) => {
                        let slots = Arc::clone(&slots);
                        let executor = executor.clone();
                        running.spawn(async move {
                            let Ok(_slot) = slots.acquire_owned().await else {
                                debug!(
                                    task_id = %message.task_id,
                                    "Task attempt dropped at shutdown"
                                );
                                return;
                            };
                            executor.execute(message).await;
                        });
                    }
                    TaskExecutorMessage::CancelTaskAttempt(message) => executor.cancel(message),
                }
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Task attempt aborted unexpectedly");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(running = executor.running(), "Task executor shutting down");
                    break;
                }
            }
        }
    }

    slots.close();
    while running.join_next().await.is_some() {}
    debug!("Task executor stopped");
}
