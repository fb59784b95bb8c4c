//! Task definitions: named methods with typed arguments and a retry policy.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::context::TaskAttemptContext;
use super::failure::{TaskError, TaskFailure};
use super::retry::RetryPolicy;
use crate::data::SerializedData;
use crate::id::{MethodName, TaskName};

pub(crate) type MethodFuture =
    Pin<Box<dyn Future<Output = Result<SerializedData, TaskError>> + Send>>;

type Invoke = Arc<
    dyn Fn(TaskAttemptContext, Vec<SerializedData>) -> Result<MethodFuture, String> + Send + Sync,
>;

type RetryDelayFn = Arc<dyn Fn(&TaskAttemptContext) -> Result<Value, TaskError> + Send + Sync>;

/// Argument tuples a task method can be called with.
///
/// Implemented for tuples of up to four deserializable values. Parameter type
/// names are [`std::any::type_name`]s, matching what
/// [`CallCapture`](crate::capture::CallCapture) records.
pub trait MethodArgs: Sized + Send + 'static {
    fn parameter_types() -> Vec<String>;

    /// Decode the arguments. The input length is checked by the caller.
    fn decode(input: &[SerializedData]) -> crate::Result<Self>;
}

impl MethodArgs for () {
    fn parameter_types() -> Vec<String> {
        Vec::new()
    }

    fn decode(_input: &[SerializedData]) -> crate::Result<Self> {
        Ok(())
    }
}

macro_rules! impl_method_args {
    ($($name:ident: $index:tt),+) => {
        impl<$($name),+> MethodArgs for ($($name,)+)
        where
            $($name: DeserializeOwned + Send + 'static),+
        {
            fn parameter_types() -> Vec<String> {
                vec![$(std::any::type_name::<$name>().to_string()),+]
            }

            fn decode(input: &[SerializedData]) -> crate::Result<Self> {
                Ok(($(input[$index].decode::<$name>()?,)+))
            }
        }
    };
}

impl_method_args!(A: 0);
impl_method_args!(A: 0, B: 1);
impl_method_args!(A: 0, B: 1, C: 2);
impl_method_args!(A: 0, B: 1, C: 2, D: 3);

/// One overload of a task method.
#[derive(Clone)]
pub(crate) struct Method {
    pub(crate) name: MethodName,
    pub(crate) parameter_types: Vec<String>,
    invoke: Invoke,
}

impl Method {
    /// Decode `input` and start the handler.
    pub(crate) fn invoke(
        &self,
        ctx: TaskAttemptContext,
        input: Vec<SerializedData>,
    ) -> Result<MethodFuture, TaskFailure> {
        let invalid = |reason: String| TaskFailure::InvalidMethodInput {
            task_name: ctx.task_name.to_string(),
            method_name: self.name.to_string(),
            reason,
        };
        if input.len() != self.parameter_types.len() {
            return Err(invalid(format!(
                "expected {} arguments, got {}",
                self.parameter_types.len(),
                input.len()
            )));
        }
        (self.invoke)(ctx.clone(), input).map_err(invalid)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("parameter_types", &self.parameter_types)
            .finish()
    }
}

/// A task: a set of named methods and an optional retry-delay callback.
///
/// # Example
///
/// ```ignore
/// let task = Task::new()
///     .method("send", |_ctx, (to,): (String,)| async move {
///         mailer.send(&to).await?;
///         Ok(true)
///     })
///     .method("send", |_ctx, (to, subject): (String, String)| async move {
///         mailer.send_with_subject(&to, &subject).await?;
///         Ok(true)
///     })
///     .retry_policy(RetryPolicy::default());
/// ```
#[derive(Clone, Default)]
pub struct Task {
    methods: Vec<Method>,
    retry_delay: Option<RetryDelayFn>,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method. Several methods may share a name if their parameter
    /// lists differ.
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<MethodName>, handler: F) -> Self
    where
        A: MethodArgs,
        R: Serialize,
        F: Fn(TaskAttemptContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoke = Arc::new(move |ctx, input| {
            let args = A::decode(&input).map_err(|e| e.to_string())?;
            let handler = Arc::clone(&handler);
            Ok(Box::pin(async move {
                let output = handler(ctx, args).await?;
                Ok(SerializedData::encode(&output)?)
            }) as MethodFuture)
        });

        self.methods.push(Method {
            name: name.into(),
            parameter_types: A::parameter_types(),
            invoke,
        });
        self
    }

    /// Decide the delay before the next attempt after a failure.
    ///
    /// The callback may return any serializable value: a positive number of
    /// seconds schedules a retry, `null` or a non-positive number leaves the
    /// task in error, anything else is reported as
    /// [`TaskFailure::RetryDelayHasWrongReturnType`]. The failure being
    /// handled is available through [`TaskAttemptContext::failure`].
    pub fn retry_delay<F, V>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskAttemptContext) -> Result<V, TaskError> + Send + Sync + 'static,
        V: Serialize,
    {
        self.retry_delay = Some(Arc::new(move |ctx| {
            let value = callback(ctx)?;
            Ok(serde_json::to_value(value)?)
        }));
        self
    }

    /// Retry with exponential backoff.
    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.retry_delay(move |ctx| Ok(policy.retry_delay(ctx.task_attempt_index)))
    }

    pub fn method_names(&self) -> impl Iterator<Item = &MethodName> {
        self.methods.iter().map(|method| &method.name)
    }

    /// Find the method to run.
    ///
    /// Declared parameter types select an exact overload; without them the
    /// overload is chosen by argument count and must be unique.
    pub(crate) fn resolve(
        &self,
        task_name: &TaskName,
        method_name: &MethodName,
        parameter_types: Option<&[String]>,
        parameter_count: usize,
    ) -> Result<&Method, TaskFailure> {
        let mut named = self
            .methods
            .iter()
            .filter(|method| &method.name == method_name);

        if let Some(types) = parameter_types {
            return named
                .find(|method| method.parameter_types == types)
                .ok_or_else(|| TaskFailure::NoMethodWithParameterTypes {
                    task_name: task_name.to_string(),
                    method_name: method_name.to_string(),
                    parameter_types: types.to_vec(),
                });
        }

        let candidates: Vec<&Method> = named
            .filter(|method| method.parameter_types.len() == parameter_count)
            .collect();

        match candidates.as_slice() {
            [method] => Ok(method),
            [] => Err(TaskFailure::NoMethodWithParameterCount {
                task_name: task_name.to_string(),
                method_name: method_name.to_string(),
                parameter_count,
            }),
            _ => Err(TaskFailure::TooManyMethodsWithParameterCount {
                task_name: task_name.to_string(),
                method_name: method_name.to_string(),
                parameter_count,
            }),
        }
    }

    /// Evaluate the retry-delay callback for a failed attempt.
    ///
    /// `Ok(None)` means no retry. An error replaces the attempt's failure.
    pub(crate) fn retry_delay_for(
        &self,
        ctx: &TaskAttemptContext,
    ) -> Result<Option<f64>, TaskFailure> {
        let Some(callback) = &self.retry_delay else {
            return Ok(None);
        };

        let returned = match catch_unwind(AssertUnwindSafe(|| callback(ctx))) {
            Ok(result) => result?,
            Err(panic) => return Err(panic_failure(panic)),
        };

        match &returned {
            Value::Null => Ok(None),
            Value::Number(number) => Ok(number.as_f64().filter(|delay| *delay > 0.0)),
            _ => Err(TaskFailure::RetryDelayHasWrongReturnType {
                task_name: ctx.task_name.to_string(),
                returned,
            }),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("methods", &self.methods)
            .field("retry_delay", &self.retry_delay.is_some())
            .finish()
    }
}

/// Report a caught panic as a handler failure.
pub(crate) fn panic_failure(panic: Box<dyn std::any::Any + Send>) -> TaskFailure {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string());
    TaskFailure::Handler {
        kind: "panic".to_string(),
        message,
    }
}
