//! Turn a method call into a task dispatch without running it.
//!
//! A [`CallCapture`] is a one-shot recorder for a single task: the first
//! [`call`](CallCapture::call) records the method name and arguments and
//! returns a placeholder value, so calling code reads like a direct call.
//! The recorded [`MethodCall`] is then turned into [`TaskData`].
//!
//! ```
//! use tideflow::capture::CallCapture;
//!
//! let mut capture = CallCapture::begin("email");
//! let sent: bool = capture.call("send", ("ada@example.com".to_string(),))?;
//! assert!(!sent);
//!
//! let call = capture.take()?;
//! assert_eq!(call.method_name.as_str(), "send");
//! # Ok::<(), tideflow::capture::CaptureError>(())
//! ```
//!
//! Each capture is an owned value: concurrent callers each begin their own
//! and never observe each other's calls.

use serde::Serialize;
use thiserror::Error;

use crate::data::{SerializedData, TaskData, TaskMeta, TaskOptions};
use crate::id::{MethodName, TaskName};

/// Misuse of a [`CallCapture`].
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A second method was called before the first was taken or reset.
    #[error("task `{task_name}`: `{second}` called after `{first}` was already captured")]
    MultipleMethodCalls {
        task_name: String,
        first: String,
        second: String,
    },

    /// Nothing was captured.
    #[error("task `{task_name}`: no method call captured")]
    NoMethodCall { task_name: String },

    /// An argument could not be serialized.
    #[error("failed to serialize argument: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Argument tuples a captured call can record.
///
/// Parameter type names are [`std::any::type_name`]s, the same names task
/// methods declare, so a capture with owned argument types resolves to the
/// method taking exactly those types.
pub trait CallArgs {
    fn parameter_types() -> Vec<String>;

    fn encode(&self) -> Result<Vec<SerializedData>, CaptureError>;
}

impl CallArgs for () {
    fn parameter_types() -> Vec<String> {
        Vec::new()
    }

    fn encode(&self) -> Result<Vec<SerializedData>, CaptureError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_call_args {
    ($($name:ident: $index:tt),+) => {
        impl<$($name: Serialize),+> CallArgs for ($($name,)+) {
            fn parameter_types() -> Vec<String> {
                vec![$(std::any::type_name::<$name>().to_string()),+]
            }

            fn encode(&self) -> Result<Vec<SerializedData>, CaptureError> {
                Ok(vec![$(SerializedData::from(serde_json::to_value(&self.$index)?)),+])
            }
        }
    };
}

impl_call_args!(A: 0);
impl_call_args!(A: 0, B: 1);
impl_call_args!(A: 0, B: 1, C: 2);
impl_call_args!(A: 0, B: 1, C: 2, D: 3);

/// A recorded method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub task_name: TaskName,
    pub method_name: MethodName,
    pub parameter_types: Vec<String>,
    pub input: Vec<SerializedData>,
}

impl MethodCall {
    /// Build the task data for dispatching this call.
    ///
    /// The method is resolved by its recorded parameter types.
    pub fn task_data(self, task_options: TaskOptions, task_meta: TaskMeta) -> TaskData {
        TaskData {
            method_name: self.method_name,
            method_parameter_types: Some(self.parameter_types),
            method_input: self.input,
            task_options,
            task_meta,
        }
    }
}

/// One-shot recorder of a method call on a task.
#[derive(Debug, Clone)]
pub struct CallCapture {
    task_name: TaskName,
    captured: Option<MethodCall>,
}

impl CallCapture {
    /// Start capturing a call to `task_name`.
    pub fn begin(task_name: impl Into<TaskName>) -> Self {
        Self {
            task_name: task_name.into(),
            captured: None,
        }
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    pub fn is_captured(&self) -> bool {
        self.captured.is_some()
    }

    /// Record a call to `method` with `args`.
    ///
    /// Returns the default value of `R` (zero, `false`, `None`, empty) in
    /// place of a real result. Fails if a call was already captured.
    pub fn call<A, R>(&mut self, method: impl Into<MethodName>, args: A) -> Result<R, CaptureError>
    where
        A: CallArgs,
        R: Default,
    {
        let method_name = method.into();
        if let Some(first) = &self.captured {
            return Err(CaptureError::MultipleMethodCalls {
                task_name: self.task_name.to_string(),
                first: first.method_name.to_string(),
                second: method_name.into_inner(),
            });
        }

        self.captured = Some(MethodCall {
            task_name: self.task_name.clone(),
            method_name,
            parameter_types: A::parameter_types(),
            input: args.encode()?,
        });
        Ok(R::default())
    }

    /// Forget the captured call.
    pub fn reset(&mut self) {
        self.captured = None;
    }

    /// Take the captured call, leaving the capture ready for another call.
    pub fn take(&mut self) -> Result<MethodCall, CaptureError> {
        self.captured.take().ok_or_else(|| CaptureError::NoMethodCall {
            task_name: self.task_name.to_string(),
        })
    }
}
