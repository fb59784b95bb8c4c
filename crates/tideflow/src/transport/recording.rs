use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Dispatcher;
use crate::messages::{Message, Topic};

/// A message and the delay it was dispatched with.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub message: Message,
    pub after: Option<Duration>,
}

/// Dispatcher that records messages instead of delivering them.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    log: Arc<Mutex<Vec<Dispatched>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.log.lock().clone()
    }

    /// Messages dispatched so far, without their delays.
    pub fn messages(&self) -> Vec<Message> {
        self.log.lock().iter().map(|d| d.message.clone()).collect()
    }

    /// Messages dispatched to `topic`.
    pub fn messages_to(&self, topic: Topic) -> Vec<Message> {
        self.log
            .lock()
            .iter()
            .filter(|d| d.message.topic() == topic)
            .map(|d| d.message.clone())
            .collect()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<Dispatched> {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, message: Message, after: Option<Duration>) {
        self.log.lock().push(Dispatched { message, after });
    }
}
