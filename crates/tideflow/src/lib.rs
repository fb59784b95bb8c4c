//! Message-driven engine for durable workflows and tasks.
//!
//! Tideflow keeps every long-running process as a set of small per-entity
//! state machines that only talk through messages:
//!
//! - **Idempotent engines** — [`engine::WorkflowEngine`], [`engine::TaskEngine`]
//!   and the monitoring engines apply one message at a time per entity and
//!   ignore redeliveries
//! - **Pure decisions** — [`Workflow::decide`] never performs side effects; it
//!   returns commands (dispatch a task, start a timer, wait for an event)
//! - **Stateless workers** — [`worker::TaskExecutor`] runs task attempts and
//!   reports back, retries are scheduled by the task engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  WorkflowDispatched   ┌────────────────┐  DecisionDispatched  ┌────────────────┐
//! │  Client  │ ────────────────────▶ │ WorkflowEngine │ ───────────────────▶ │ DecisionWorker │
//! └──────────┘                       │                │ ◀─────────────────── │ (Workflow code)│
//!                                    └────────────────┘  DecisionCompleted   └────────────────┘
//!                                       │        ▲
//!                          TaskDispatched│        │TaskCompleted
//!                                       ▼        │
//!                                    ┌────────────────┐  ExecuteTaskAttempt  ┌────────────────┐
//!                                    │   TaskEngine   │ ───────────────────▶ │  TaskExecutor  │
//!                                    │                │ ◀─────────────────── │  (Task code)   │
//!                                    └────────────────┘  TaskAttempt*        └────────────────┘
//!                                            │ TaskStatusUpdated
//!                                            ▼
//!                                    MonitoringPerName ──▶ MonitoringGlobal
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tideflow::{CallCapture, MemoryStore, Runtime, Task, TaskMeta, TaskOptions};
//!
//! let greeter = Task::new().method("greet", |_ctx, (name,): (String,)| async move {
//!     Ok::<_, tideflow::TaskError>(format!("hello {name}"))
//! });
//!
//! let runtime = Runtime::builder(MemoryStore::new())
//!     .task("greeter", greeter)
//!     .build()?;
//! let handle = runtime.handle();
//! tokio::spawn(runtime.run(shutdown_signal));
//!
//! let mut call = CallCapture::begin("greeter");
//! call.call::<_, String>("greet", ("ada".to_string(),))?;
//! handle.client().dispatch_task(call, TaskOptions::default(), TaskMeta::new())?;
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` — Enables [`PgStore`] for durable engine states
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

// Allow the crate to reference itself as `tideflow` for macro-generated code
extern crate self as tideflow;

pub mod capture;
mod client;
mod data;
pub mod engine;
mod envelope;
mod error;
pub mod id;
pub mod messages;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod worker;
pub mod workflow;

pub use capture::{CallCapture, CaptureError, MethodCall};
pub use client::Client;
pub use data::{PropertyHash, SerializedData, TaskData, TaskMeta, TaskOptions, TaskStatus};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use nonempty::NonEmpty;
pub use runtime::{Runtime, RuntimeConfig, RuntimeHandle};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use store::{MemoryStore, StateStore};
pub use worker::{RetryPolicy, Task, TaskAttemptContext, TaskError, TaskFailure};
pub use workflow::{BranchDecision, DecisionInput, DecisionOutput, Workflow};

// Re-export derive macros
pub use tideflow_macros::Envelope;
