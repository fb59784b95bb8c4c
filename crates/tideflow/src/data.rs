//! Serialized payloads and the task data carried by messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::id::MethodName;

/// An opaque, already-serialized value.
///
/// Engines never look inside: they hash, store, and forward it. Only task
/// handlers and workflow decisions decode it back into typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedData(Value);

impl SerializedData {
    /// Serialize a value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deserialize into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.0)?)
    }

    /// The JSON `null` value.
    pub fn null() -> Self {
        Self(Value::Null)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Content hash of this value.
    ///
    /// Equal values always hash equally: object keys are serialized in
    /// sorted order.
    pub fn content_hash(&self) -> PropertyHash {
        let digest = Sha256::digest(self.0.to_string().as_bytes());
        PropertyHash(format!("{digest:x}"))
    }
}

impl From<Value> for SerializedData {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Hex SHA-256 of a [`SerializedData`], used as a key into a workflow's
/// property store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyHash(String);

impl PropertyHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Execution options attached to a task at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Maximum running time of one attempt, in seconds.
    ///
    /// Enforced by the executor, and by a timeout message the task engine
    /// schedules for itself in case the executor disappears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_timeout: Option<f64>,

    /// Delay before retrying an attempt that timed out, in seconds.
    ///
    /// Used for the engine-side timeout only; `None` leaves the task in error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_retry_delay: Option<f64>,
}

/// Free-form metadata attached to a task, forwarded untouched to handlers.
pub type TaskMeta = BTreeMap<String, Value>;

/// Everything needed to run a task, besides its name and id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub method_name: MethodName,
    /// Declared parameter types. `None` resolves the method by arity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_parameter_types: Option<Vec<String>>,
    pub method_input: Vec<SerializedData>,
    #[serde(default)]
    pub task_options: TaskOptions,
    #[serde(default)]
    pub task_meta: TaskMeta,
}

impl TaskData {
    /// A call to `method_name` without arguments, resolved by arity.
    pub fn new(method_name: impl Into<MethodName>) -> Self {
        Self {
            method_name: method_name.into(),
            method_parameter_types: None,
            method_input: Vec::new(),
            task_options: TaskOptions::default(),
            task_meta: TaskMeta::new(),
        }
    }

    pub fn with_input(mut self, input: SerializedData) -> Self {
        self.method_input.push(input);
        self
    }

    pub fn with_options(mut self, task_options: TaskOptions) -> Self {
        self.task_options = task_options;
        self
    }
}

/// Lifecycle status of a task, as tracked by the task engine and counted by
/// monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// An attempt is running.
    RunningOk,
    /// The last attempt failed; another one is scheduled.
    RunningWarning,
    /// The last attempt failed for good; waiting for a manual retry.
    RunningError,
    TerminatedCompleted,
    TerminatedCanceled,
}

impl TaskStatus {
    pub fn is_terminated(self) -> bool {
        matches!(
            self,
            TaskStatus::TerminatedCompleted | TaskStatus::TerminatedCanceled
        )
    }
}
