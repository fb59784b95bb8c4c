//! Task registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::failure::{DIVIDER, TaskFailure};
use super::task::Task;
use crate::error::{Error, Result};
use crate::id::TaskName;

type Factory = Arc<dyn Fn() -> std::result::Result<Task, String> + Send + Sync>;

#[derive(Clone)]
enum TaskEntry {
    Instance(Arc<Task>),
    Factory(Factory),
}

/// Maps task names to their implementations.
///
/// Passed to the executor explicitly; independent registries never share
/// state.
///
/// # Example
///
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register("email", email_task())?;
/// registry.register_factory("report", || ReportTask::connect(&config).map(ReportTask::into_task))?;
/// ```
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: HashMap<TaskName, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task instance shared by all attempts.
    pub fn register(&mut self, name: impl Into<TaskName>, task: Task) -> Result<()> {
        self.insert(name.into(), TaskEntry::Instance(Arc::new(task)))
    }

    /// Register a factory building a fresh task for every attempt.
    ///
    /// A factory error fails the attempt with
    /// [`TaskFailure::InstantiationFailed`].
    pub fn register_factory<F, E>(&mut self, name: impl Into<TaskName>, factory: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<Task, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let factory: Factory = Arc::new(move || factory().map_err(|e| e.to_string()));
        self.insert(name.into(), TaskEntry::Factory(factory))
    }

    fn insert(&mut self, name: TaskName, entry: TaskEntry) -> Result<()> {
        if name.as_str().contains(DIVIDER) {
            return Err(TaskFailure::InvalidUseOfDivider {
                name: name.into_inner(),
            }
            .into());
        }
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateTask(name.into_inner()));
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &TaskName> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the task to run an attempt with.
    pub(crate) fn instantiate(&self, name: &str) -> std::result::Result<Arc<Task>, TaskFailure> {
        match self.entries.get(name) {
            Some(TaskEntry::Instance(task)) => Ok(Arc::clone(task)),
            Some(TaskEntry::Factory(factory)) => {
                factory()
                    .map(Arc::new)
                    .map_err(|reason| TaskFailure::InstantiationFailed {
                        name: name.to_string(),
                        reason,
                    })
            }
            None => Err(TaskFailure::TaskNotFound {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Split `name::method` into its parts.
///
/// Returns the method part if the name is qualified.
pub(crate) fn split_qualified(
    name: &str,
) -> std::result::Result<(&str, Option<&str>), TaskFailure> {
    let mut parts = name.split(DIVIDER);
    let task = parts.next().unwrap_or(name);
    let method = parts.next();
    if parts.next().is_some() {
        return Err(TaskFailure::MultipleUseOfDivider {
            name: name.to_string(),
        });
    }
    Ok((task, method))
}
