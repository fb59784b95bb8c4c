//! Task executor: runs task attempts and reports their outcome.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::context::TaskAttemptContext;
use super::failure::TaskFailure;
use super::registry::{TaskRegistry, split_qualified};
use super::task::{MethodFuture, Task, panic_failure};
use crate::data::SerializedData;
use crate::id::{MessageId, MethodName, TaskAttemptId, TaskId, TaskName};
use crate::messages::{
    CancelTaskAttempt, ExecuteTaskAttempt, TaskEngineMessage, TaskExecutorMessage,
};
use crate::transport::Dispatcher;

/// Number of canceled tasks remembered, so attempts still queued when their
/// cancel arrives are skipped.
const CANCELED_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Attempts this executor knows about.
struct Attempts {
    running: HashMap<TaskId, (TaskAttemptId, AbortHandle)>,
    canceled: LruCache<TaskId, ()>,
}

impl Default for Attempts {
    fn default() -> Self {
        Self {
            running: HashMap::new(),
            canceled: LruCache::new(CANCELED_CAPACITY),
        }
    }
}

/// How an attempt ended, before retry evaluation.
enum Outcome {
    Completed(SerializedData),
    Failed(TaskFailure),
    Canceled,
}

/// Executes `ExecuteTaskAttempt` messages against a [`TaskRegistry`].
///
/// Every attempt reports `TaskAttemptStarted` and then exactly one of
/// `TaskAttemptCompleted` or `TaskAttemptFailed`, unless it is canceled.
/// Handlers run on their own tokio task so they can be aborted. An attempt
/// of an already canceled task is skipped without reporting anything.
#[derive(Clone)]
pub struct TaskExecutor<D> {
    registry: Arc<TaskRegistry>,
    dispatcher: D,
    attempts: Arc<Mutex<Attempts>>,
}

impl<D: Dispatcher> TaskExecutor<D> {
    pub fn new(registry: TaskRegistry, dispatcher: D) -> Self {
        Self {
            registry: Arc::new(registry),
            dispatcher,
            attempts: Arc::default(),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Number of attempts currently running.
    pub fn running(&self) -> usize {
        self.attempts.lock().running.len()
    }

    pub async fn handle(&self, message: TaskExecutorMessage) {
        match message {
            TaskExecutorMessage::ExecuteTaskAttempt(message) => self.execute(message).await,
            TaskExecutorMessage::CancelTaskAttempt(message) => self.cancel(message),
        }
    }

    /// Run one attempt to completion.
    pub async fn execute(&self, message: ExecuteTaskAttempt) {
        let ctx = TaskAttemptContext::from_message(&message);
        if self.is_canceled(ctx.task_id) {
            info!(
                task_name = %ctx.task_name,
                task_id = %ctx.task_id,
                attempt_id = %ctx.task_attempt_id,
                "Skipping attempt of canceled task"
            );
            return;
        }

        info!(
            task_name = %ctx.task_name,
            task_id = %ctx.task_id,
            attempt_id = %ctx.task_attempt_id,
            attempt_index = %ctx.task_attempt_index,
            retry = %ctx.task_retry,
            "Task attempt started"
        );
        self.dispatcher.send(TaskEngineMessage::TaskAttemptStarted {
            message_id: MessageId::new(),
            task_id: ctx.task_id,
            task_attempt_id: ctx.task_attempt_id,
            task_attempt_index: ctx.task_attempt_index,
        });

        let (task, future) = match self.prepare(&ctx, message) {
            Ok(prepared) => prepared,
            Err(failure) => {
                warn!(
                    task_name = %ctx.task_name,
                    task_id = %ctx.task_id,
                    cause = failure.cause(),
                    error = %failure,
                    "Task attempt could not start"
                );
                self.fail(&ctx, None, failure);
                return;
            }
        };

        match self.run(&ctx, future).await {
            Outcome::Completed(task_output) => {
                info!(
                    task_name = %ctx.task_name,
                    task_id = %ctx.task_id,
                    "Task attempt completed"
                );
                self.dispatcher.send(TaskEngineMessage::TaskAttemptCompleted {
                    message_id: MessageId::new(),
                    task_id: ctx.task_id,
                    task_attempt_id: ctx.task_attempt_id,
                    task_attempt_index: ctx.task_attempt_index,
                    task_output,
                });
            }
            Outcome::Failed(failure) => self.fail(&ctx, Some(task.as_ref()), failure),
            Outcome::Canceled => {
                info!(
                    task_name = %ctx.task_name,
                    task_id = %ctx.task_id,
                    "Task attempt canceled"
                );
            }
        }
    }

    /// Abort the running attempt of a task, if any, and skip its later ones.
    pub fn cancel(&self, message: CancelTaskAttempt) {
        let removed = {
            let mut attempts = self.attempts.lock();
            attempts.canceled.put(message.task_id, ());
            attempts.running.remove(&message.task_id)
        };
        match removed {
            Some((attempt_id, abort)) => {
                abort.abort();
                info!(
                    task_name = %message.task_name,
                    task_id = %message.task_id,
                    %attempt_id,
                    "Task attempt aborted"
                );
            }
            None => debug!(
                task_name = %message.task_name,
                task_id = %message.task_id,
                "No running attempt to cancel"
            ),
        }
    }

    fn is_canceled(&self, task_id: TaskId) -> bool {
        self.attempts.lock().canceled.contains(&task_id)
    }

    /// Resolve the task and method, and decode the input.
    fn prepare(
        &self,
        ctx: &TaskAttemptContext,
        message: ExecuteTaskAttempt,
    ) -> Result<(Arc<Task>, MethodFuture), TaskFailure> {
        let (task_name, qualified_method) = split_qualified(message.task_name.as_str())?;
        let method_name = qualified_method
            .map(MethodName::from)
            .unwrap_or(message.method_name);

        let task = self.registry.instantiate(task_name)?;
        let method = task.resolve(
            &TaskName::from(task_name),
            &method_name,
            message.method_parameter_types.as_deref(),
            message.method_input.len(),
        )?;
        let future = method.invoke(ctx.clone(), message.method_input)?;

        Ok((task, future))
    }

    async fn run(&self, ctx: &TaskAttemptContext, future: MethodFuture) -> Outcome {
        let mut handle = {
            let mut attempts = self.attempts.lock();
            if attempts.canceled.contains(&ctx.task_id) {
                return Outcome::Canceled;
            }
            let handle = tokio::spawn(future);
            attempts
                .running
                .insert(ctx.task_id, (ctx.task_attempt_id, handle.abort_handle()));
            handle
        };

        let timeout = ctx
            .task_options
            .running_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    handle.abort();
                    None
                }
            },
            None => Some((&mut handle).await),
        };

        {
            let mut attempts = self.attempts.lock();
            if attempts
                .running
                .get(&ctx.task_id)
                .is_some_and(|(attempt_id, _)| *attempt_id == ctx.task_attempt_id)
            {
                attempts.running.remove(&ctx.task_id);
            }
        }

        match joined {
            None => Outcome::Failed(TaskFailure::ProcessingTimeout {
                task_name: ctx.task_name.to_string(),
                timeout_secs: ctx.task_options.running_timeout.unwrap_or_default(),
            }),
            Some(Ok(Ok(output))) => Outcome::Completed(output),
            Some(Ok(Err(error))) => Outcome::Failed(error.into()),
            Some(Err(join_error)) if join_error.is_cancelled() => Outcome::Canceled,
            Some(Err(join_error)) => Outcome::Failed(panic_failure(join_error.into_panic())),
        }
    }

    /// Report `failure` with the delay the task asks for.
    ///
    /// Resolution failures never reach the retry-delay callback and are terminal.
    fn fail(&self, ctx: &TaskAttemptContext, task: Option<&Task>, failure: TaskFailure) {
        let task = match task {
            Some(task) if !failure.is_resolution() => task,
            _ => return self.report_failure(ctx, failure, None),
        };
        ctx.set_failure(failure.clone());
        match task.retry_delay_for(ctx) {
            Ok(delay) => self.report_failure(ctx, failure, delay),
            Err(retry_failure) => self.report_failure(ctx, retry_failure, None),
        }
    }

    fn report_failure(
        &self,
        ctx: &TaskAttemptContext,
        failure: TaskFailure,
        delay_before_retry: Option<f64>,
    ) {
        warn!(
            task_name = %ctx.task_name,
            task_id = %ctx.task_id,
            attempt_index = %ctx.task_attempt_index,
            cause = failure.cause(),
            error = %failure,
            delay_before_retry,
            "Task attempt failed"
        );
        self.dispatcher.send(TaskEngineMessage::TaskAttemptFailed {
            message_id: MessageId::new(),
            task_id: ctx.task_id,
            task_attempt_id: ctx.task_attempt_id,
            task_attempt_index: ctx.task_attempt_index,
            task_attempt_error: failure,
            delay_before_retry,
        });
    }
}
