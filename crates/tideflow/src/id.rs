//! Typed identifiers, names, and counters.
//!
//! Entity ids are UUID v7 newtypes, so they sort by creation time. Names are
//! string newtypes: a task name and a method name are never interchangeable.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Borrow the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

macro_rules! name_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Consume the wrapper and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Borrow the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

uuid_id!(
    /// Unique id of a single message, used for at-least-once deduplication.
    MessageId
);
uuid_id!(
    /// Workflow instance id.
    WorkflowId
);
uuid_id!(
    /// Task instance id, stable across attempts and retries.
    TaskId
);
uuid_id!(
    /// Id of one execution attempt of a task.
    TaskAttemptId
);
uuid_id!(
    /// Id of one decision computation.
    DecisionId
);
uuid_id!(
    /// Id of an execution path within a workflow.
    BranchId
);
uuid_id!(
    /// Id of a timer started by a workflow.
    TimerId
);

name_id!(
    /// Registered workflow name. Also names the decisions computed for it.
    WorkflowName
);
name_id!(
    /// Registered task name, optionally `Task::method`.
    TaskName
);
name_id!(DecisionName);
name_id!(MethodName);
name_id!(EventName);
name_id!(
    /// Name of a workflow property. Names starting with `$` are reserved.
    PropertyName
);
name_id!(BranchName);

impl From<&WorkflowName> for DecisionName {
    fn from(name: &WorkflowName) -> Self {
        Self(name.0.clone())
    }
}

/// Manual retry cycle of a task. Bumped each time the task is retried by hand.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskRetry(pub u32);

impl TaskRetry {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for TaskRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Attempt number within the current retry cycle (0-based).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskAttemptIndex(pub u32);

impl TaskAttemptIndex {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for TaskAttemptIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
