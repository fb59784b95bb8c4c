//! Task failure causes.
//!
//! Failures travel inside `TaskAttemptFailed` messages, so they are plain
//! serializable data: the `cause` tag tells resolution problems, timeouts and
//! handler errors apart.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separates the task name from the method name in a qualified call.
pub const DIVIDER: &str = "::";

/// Why a task attempt did not produce an output.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "cause")]
pub enum TaskFailure {
    #[error("task name `{name}` must not contain `::`")]
    InvalidUseOfDivider { name: String },

    #[error("`{name}` contains `::` more than once")]
    MultipleUseOfDivider { name: String },

    #[error("no task registered under `{name}`")]
    TaskNotFound { name: String },

    #[error("task `{name}` could not be instantiated: {reason}")]
    InstantiationFailed { name: String, reason: String },

    #[error("task `{task_name}` has no method `{method_name}` with parameter types {parameter_types:?}")]
    NoMethodWithParameterTypes {
        task_name: String,
        method_name: String,
        parameter_types: Vec<String>,
    },

    #[error("task `{task_name}` has no method `{method_name}` with {parameter_count} parameters")]
    NoMethodWithParameterCount {
        task_name: String,
        method_name: String,
        parameter_count: usize,
    },

    #[error(
        "task `{task_name}` has several methods `{method_name}` with {parameter_count} parameters"
    )]
    TooManyMethodsWithParameterCount {
        task_name: String,
        method_name: String,
        parameter_count: usize,
    },

    #[error("invalid input for `{task_name}::{method_name}`: {reason}")]
    InvalidMethodInput {
        task_name: String,
        method_name: String,
        reason: String,
    },

    #[error("retry delay of task `{task_name}` must be a number of seconds or null, got {returned}")]
    RetryDelayHasWrongReturnType { task_name: String, returned: Value },

    #[error("task `{task_name}` exceeded its running timeout of {timeout_secs}s")]
    ProcessingTimeout { task_name: String, timeout_secs: f64 },

    /// The handler returned an error, or panicked.
    #[error("{kind}: {message}")]
    Handler { kind: String, message: String },
}

impl TaskFailure {
    /// The cause reported to the task engine and monitoring.
    ///
    /// Handler failures report the handler's error type.
    pub fn cause(&self) -> &str {
        match self {
            TaskFailure::InvalidUseOfDivider { .. } => "InvalidUseOfDivider",
            TaskFailure::MultipleUseOfDivider { .. } => "MultipleUseOfDivider",
            TaskFailure::TaskNotFound { .. } => "TaskNotFound",
            TaskFailure::InstantiationFailed { .. } => "InstantiationFailed",
            TaskFailure::NoMethodWithParameterTypes { .. } => "NoMethodWithParameterTypes",
            TaskFailure::NoMethodWithParameterCount { .. } => "NoMethodWithParameterCount",
            TaskFailure::TooManyMethodsWithParameterCount { .. } => {
                "TooManyMethodsWithParameterCount"
            }
            TaskFailure::InvalidMethodInput { .. } => "InvalidMethodInput",
            TaskFailure::RetryDelayHasWrongReturnType { .. } => "RetryDelayHasWrongReturnType",
            TaskFailure::ProcessingTimeout { .. } => "ProcessingTimeout",
            TaskFailure::Handler { kind, .. } => kind,
        }
    }

    /// The attempt never reached the handler. Such failures are never retried.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            TaskFailure::InvalidUseOfDivider { .. }
                | TaskFailure::MultipleUseOfDivider { .. }
                | TaskFailure::TaskNotFound { .. }
                | TaskFailure::InstantiationFailed { .. }
                | TaskFailure::NoMethodWithParameterTypes { .. }
                | TaskFailure::NoMethodWithParameterCount { .. }
                | TaskFailure::TooManyMethodsWithParameterCount { .. }
                | TaskFailure::InvalidMethodInput { .. }
        )
    }
}

/// Error returned by task handlers.
///
/// Any [`std::error::Error`] converts into it with `?`, keeping its type name
/// as the failure kind:
///
/// ```ignore
/// Task::new().method("parse", |_ctx, (input,): (String,)| async move {
///     let n: u32 = input.parse()?;   // kind = "core::num::error::ParseIntError"
///     Ok(n)
/// })
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E: std::error::Error> From<E> for TaskError {
    fn from(error: E) -> Self {
        Self::new(std::any::type_name::<E>(), error.to_string())
    }
}

impl From<TaskError> for TaskFailure {
    fn from(error: TaskError) -> Self {
        TaskFailure::Handler {
            kind: error.kind,
            message: error.message,
        }
    }
}
