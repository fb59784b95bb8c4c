//! End-to-end tests of the in-process runtime over a [`MemoryStore`].
//!
//! [`MemoryStore`]: tideflow::MemoryStore

mod logging;
mod support;
mod tasks;
mod workflows;
