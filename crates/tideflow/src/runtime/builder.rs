//! Runtime builder, runtime, and handle.

use std::collections::BTreeSet;
use std::fmt;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::RuntimeConfig;
use super::lanes::{LaneConfig, run_engine};
use super::workers::{run_decisions, run_executor};
use crate::client::Client;
use crate::engine::{
    Engine, MonitoringGlobal, MonitoringGlobalState, MonitoringPerName, MonitoringPerNameState,
    StateMachine, TaskEngine, TaskState, WorkflowEngine, WorkflowState,
};
use crate::error::{Error, Result};
use crate::id::{TaskId, TaskName, WorkflowId};
use crate::store::{CachedStore, StateStore};
use crate::transport::{ChannelDispatcher, Receivers};
use crate::worker::{DecisionWorker, Task, TaskExecutor, TaskRegistry, WorkflowRegistry};
use crate::workflow::Workflow;

/// Builder for constructing a [`Runtime`].
///
/// Registration mistakes (duplicate names, invalid task names) are reported
/// by [`build`](Self::build), so registrations can be chained.
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::builder(MemoryStore::new())
///     .task("email", email_task())
///     .workflow(Onboarding)
///     .config(RuntimeConfig {
///         executor_concurrency: 4,
///         ..Default::default()
///     })
///     .build()?;
/// ```
pub struct RuntimeBuilder<S> {
    store: S,
    tasks: TaskRegistry,
    workflows: WorkflowRegistry,
    registration_error: Option<Error>,
    config: RuntimeConfig,
}

impl<S: StateStore> RuntimeBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            tasks: TaskRegistry::new(),
            workflows: WorkflowRegistry::new(),
            registration_error: None,
            config: RuntimeConfig::default(),
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.registration_error.get_or_insert(e);
        }
    }

    /// Register a task under `name`.
    pub fn task(mut self, name: impl Into<TaskName>, task: Task) -> Self {
        let result = self.tasks.register(name, task);
        self.record(result);
        self
    }

    /// Register a task built fresh for every attempt.
    pub fn task_factory<F, E>(mut self, name: impl Into<TaskName>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<Task, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let result = self.tasks.register_factory(name, factory);
        self.record(result);
        self
    }

    /// Register a workflow under its [`Workflow::NAME`].
    pub fn workflow<W: Workflow>(mut self, workflow: W) -> Self {
        let result = self.workflows.register(workflow);
        self.record(result);
        self
    }

    /// Set the runtime configuration.
    ///
    /// If not called, uses [`RuntimeConfig::default()`].
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<Runtime<S>> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }

        let worker_id = self
            .config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let store = CachedStore::new(self.store, self.config.state_cache_capacity);
        let (dispatcher, receivers) = ChannelDispatcher::new();

        Ok(Runtime {
            handle: RuntimeHandle {
                store,
                dispatcher: dispatcher.clone(),
            },
            executor: TaskExecutor::new(self.tasks, dispatcher.clone()),
            decisions: DecisionWorker::new(self.workflows, dispatcher)
                .with_retry_delay(self.config.decision_retry_delay),
            receivers,
            config: self.config,
            worker_id,
        })
    }
}

/// In-process runtime: every engine and worker, wired through channels.
///
/// # Lifecycle
///
/// 1. Create with [`Runtime::builder(store)`](Runtime::builder)
/// 2. Register tasks and workflows, set the [`RuntimeConfig`]
/// 3. Keep a [`RuntimeHandle`] to send commands and read states
/// 4. Run with [`Runtime::run()`] until the shutdown future completes
///
/// # Example
///
/// ```ignore
/// let runtime = Runtime::builder(store).workflow(Onboarding).build()?;
/// let handle = runtime.handle();
///
/// tokio::spawn(runtime.run(async { tokio::signal::ctrl_c().await.ok(); }));
/// let workflow_id = handle.client().dispatch_workflow("onboarding", &user)?;
/// ```
pub struct Runtime<S> {
    handle: RuntimeHandle<S>,
    executor: TaskExecutor<ChannelDispatcher>,
    decisions: DecisionWorker<ChannelDispatcher>,
    receivers: Receivers,
    config: RuntimeConfig,
    worker_id: String,
}

impl<S: StateStore> Runtime<S> {
    /// Create a new runtime builder.
    pub fn builder(store: S) -> RuntimeBuilder<S> {
        RuntimeBuilder::new(store)
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// A handle usable while the runtime runs.
    pub fn handle(&self) -> RuntimeHandle<S> {
        self.handle.clone()
    }

    /// Run all engines and workers until `shutdown` completes.
    ///
    /// # Shutdown Behavior
    ///
    /// When the shutdown future completes:
    /// 1. Engines and workers stop taking new messages
    /// 2. Lanes finish the messages they hold; running attempts finish
    /// 3. Return after at most `shutdown_timeout`
    ///
    /// Messages still queued, including delayed ones, are lost: the
    /// in-process transport is not durable.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let Runtime {
            handle,
            executor,
            decisions,
            receivers,
            config,
            worker_id,
        } = self;

        info!(
            %worker_id,
            tasks = executor.registry().len(),
            workflows = decisions.registry().len(),
            partitions = config.engine_partitions,
            "Runtime starting"
        );

        let lanes = LaneConfig {
            partitions: config.engine_partitions,
            conflict_retry_delay: config.conflict_retry_delay,
        };
        let store = handle.store.clone();
        let dispatcher = handle.dispatcher.clone();
        let Receivers {
            workflow,
            decision,
            task_engine,
            task_executor,
            monitoring_per_name,
            monitoring_global,
        } = receivers;

        let worker_handles = vec![
            tokio::spawn(run_engine(
                Engine::<WorkflowEngine, _, _>::new(store.clone(), dispatcher.clone()),
                dispatcher.clone(),
                workflow,
                lanes.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_engine(
                Engine::<TaskEngine, _, _>::new(store.clone(), dispatcher.clone()),
                dispatcher.clone(),
                task_engine,
                lanes.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_engine(
                Engine::<MonitoringPerName, _, _>::new(store.clone(), dispatcher.clone()),
                dispatcher.clone(),
                monitoring_per_name,
                lanes.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_engine(
                Engine::<MonitoringGlobal, _, _>::new(store, dispatcher.clone()),
                dispatcher,
                monitoring_global,
                lanes,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_decisions(decisions, decision, shutdown_rx.clone())),
            tokio::spawn(run_executor(
                executor,
                task_executor,
                config.executor_concurrency,
                shutdown_rx,
            )),
        ];

        // Wait for shutdown signal
        shutdown.await;

        // Signal shutdown to all workers
        let _ = shutdown_tx.send(true);

        // Wait for all workers with timeout
        let all_workers = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(config.shutdown_timeout, all_workers).await {
            Ok(()) => {
                info!(%worker_id, "Runtime stopped gracefully");
            }
            Err(_) => {
                warn!(
                    %worker_id,
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }

        Ok(())
    }
}

/// Cloneable access to a runtime: send commands, read engine states.
pub struct RuntimeHandle<S> {
    store: CachedStore<S>,
    dispatcher: ChannelDispatcher,
}

impl<S: StateStore> Clone for RuntimeHandle<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S: StateStore> RuntimeHandle<S> {
    pub fn client(&self) -> Client<ChannelDispatcher> {
        Client::new(self.dispatcher.clone())
    }

    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    /// Current state of a running workflow. `None` once it completed.
    pub async fn workflow_state(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowState>> {
        self.state::<WorkflowEngine>(&workflow_id.to_string()).await
    }

    /// Current state of a task. `None` once it completed or was canceled.
    pub async fn task_state(&self, task_id: TaskId) -> Result<Option<TaskState>> {
        self.state::<TaskEngine>(&task_id.to_string()).await
    }

    /// Status counts of the tasks named `task_name`.
    pub async fn task_counts(&self, task_name: &str) -> Result<Option<MonitoringPerNameState>> {
        self.state::<MonitoringPerName>(task_name).await
    }

    /// Every task name dispatched so far.
    pub async fn task_names(&self) -> Result<BTreeSet<TaskName>> {
        let state: Option<MonitoringGlobalState> =
            self.state::<MonitoringGlobal>(crate::engine::GLOBAL_ENTITY).await?;
        Ok(state.map(|state| state.task_names).unwrap_or_default())
    }

    async fn state<M: StateMachine>(&self, entity_id: &str) -> Result<Option<M::State>> {
        Engine::<M, _, _>::new(self.store.clone(), self.dispatcher.clone())
            .state(entity_id)
            .await
    }
}
