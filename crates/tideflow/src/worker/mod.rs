//! Stateless workers: task execution and decision computation.
//!
//! - [`TaskExecutor`] — runs task attempts from an explicit [`TaskRegistry`]
//! - [`DecisionWorker`] — runs workflow code from a [`WorkflowRegistry`]
//! - [`Task`] — methods, argument decoding, and the retry-delay callback
//! - [`RetryPolicy`] — exponential backoff for the retry-delay callback

mod context;
mod decision;
mod executor;
mod failure;
mod registry;
mod retry;
mod task;

pub use context::TaskAttemptContext;
pub use decision::{DecisionWorker, WorkflowRegistry};
pub use executor::TaskExecutor;
pub use failure::{DIVIDER, TaskError, TaskFailure};
pub use registry::TaskRegistry;
pub use retry::RetryPolicy;
pub use task::{MethodArgs, Task};
