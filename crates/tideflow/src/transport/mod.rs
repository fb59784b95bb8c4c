//! Output side of every component: send a message, optionally later.
//!
//! - [`Dispatcher`] — the fire-and-forget contract engines emit through
//! - [`ChannelDispatcher`] — in-process transport over tokio channels
//! - [`RecordingDispatcher`] — keeps messages in memory, for tests

mod channel;
mod recording;

use std::time::Duration;

pub use channel::{ChannelDispatcher, Receivers};
pub use recording::{Dispatched, RecordingDispatcher};

use crate::messages::Message;

/// Emits messages to the topic matching their family.
///
/// Dispatch is fire-and-forget: there is no acknowledgment and no error.
/// Implementations must not block the caller, and delayed messages must be
/// delivered from an independent task so a component can safely send to
/// itself.
pub trait Dispatcher: Send + Sync + Clone + 'static {
    /// Send `message`, after `after` if set.
    fn dispatch(&self, message: Message, after: Option<Duration>);

    /// Send `message` now.
    fn send(&self, message: impl Into<Message>) {
        self.dispatch(message.into(), None);
    }
}
