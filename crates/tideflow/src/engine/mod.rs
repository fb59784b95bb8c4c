//! The idempotent apply-and-persist cycle shared by every stateful engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine<M, S, D>::handle                        │
//! │                                                                         │
//! │   1. Load state for message.entity_id()                                 │
//! │   2. Discard: no state and not creatable / duplicate start /            │
//! │      entity mismatch / same lastMessageId                               │
//! │   3. transition(ctx, state, message) → next state + outputs             │
//! │   4. Conditional write (create / update if changed / delete)            │
//! │   5. Dispatch outputs                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outputs are only dispatched once the write succeeded. A write that loses
//! an optimistic race returns [`Error::StateConflict`](crate::Error) without
//! emitting anything, and the message can be applied again from scratch.

mod monitoring;
mod task;
mod workflow;

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tracing::{debug, error, info};

pub use monitoring::{
    GLOBAL_ENTITY, MonitoringGlobal, MonitoringGlobalState, MonitoringPerName,
    MonitoringPerNameState,
};
pub use task::{TIMEOUT_GRACE, TaskEngine, TaskState};
pub use workflow::{ROOT_BRANCH, WorkflowEngine, WorkflowState};

use crate::Envelope;
use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::messages::Message;
use crate::store::{StateKey, StateStore};
use crate::transport::Dispatcher;

/// A pure, per-entity state machine driven by messages.
///
/// Implementations hold no data: all state lives in [`Self::State`], which is
/// loaded before and stored after every message.
pub trait StateMachine: Send + Sync + 'static {
    /// Messages this machine consumes.
    type Message: Envelope + Debug + Clone + Send + Sync;

    /// Persisted state of one entity.
    type State: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Store namespace. Must be stable across deployments.
    const NAME: &'static str;

    /// Messages that start an entity. Receiving one for an existing entity
    /// is a protocol error.
    fn is_start(message: &Self::Message) -> bool;

    /// State to create when `message` arrives for an absent entity.
    ///
    /// `None` means the message cannot create state and is discarded, which
    /// is normal for entities that already terminated.
    fn initial_state(message: &Self::Message) -> Option<Self::State>;

    /// Entity id recorded in the state.
    fn state_id(state: &Self::State) -> String;

    fn last_message_id(state: &Self::State) -> MessageId;

    fn set_last_message_id(state: &mut Self::State, message_id: MessageId);

    /// Apply `message` to `state`.
    ///
    /// Must be deterministic given `ctx`, and free of side effects: outputs
    /// are returned, not sent.
    fn transition(
        ctx: &TransitionContext,
        state: Self::State,
        message: Self::Message,
    ) -> Transition<Self::State>;
}

/// Ambient facts available to a transition.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub now: OffsetDateTime,
    /// The state was just built by [`StateMachine::initial_state`].
    pub created: bool,
}

/// A message to send once the transition is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub message: Message,
    pub after: Option<Duration>,
}

impl Output {
    pub fn now(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
            after: None,
        }
    }

    pub fn delayed(message: impl Into<Message>, after: Duration) -> Self {
        Self {
            message: message.into(),
            after: Some(after),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Next<S> {
    Keep(S),
    Terminate,
    Reject(&'static str),
}

/// Result of a transition: what to store and what to send.
///
/// # Example
///
/// ```ignore
/// Transition::keep(state)
///     .with_output(next_attempt)
///     .with_delayed_output(timeout, Duration::from_secs(30))
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    next: Next<S>,
    outputs: Vec<Output>,
}

impl<S> Transition<S> {
    /// Store `state`.
    pub fn keep(state: S) -> Self {
        Self {
            next: Next::Keep(state),
            outputs: vec![],
        }
    }

    /// Remove the entity's state: it reached a terminal status.
    pub fn terminate() -> Self {
        Self {
            next: Next::Terminate,
            outputs: vec![],
        }
    }

    /// Discard the message as a protocol inconsistency: nothing is stored
    /// and nothing is sent.
    pub fn reject(reason: &'static str) -> Self {
        Self {
            next: Next::Reject(reason),
            outputs: vec![],
        }
    }

    /// Add a message to send immediately.
    pub fn with_output(mut self, message: impl Into<Message>) -> Self {
        self.outputs.push(Output::now(message));
        self
    }

    /// Add a message to send after `after`.
    pub fn with_delayed_output(mut self, message: impl Into<Message>, after: Duration) -> Self {
        self.outputs.push(Output::delayed(message, after));
        self
    }

    /// Add several outputs at once.
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = Output>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// The state to store, if the transition keeps one.
    pub fn state(&self) -> Option<&S> {
        match &self.next {
            Next::Keep(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.next, Next::Terminate)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.next, Next::Reject(_))
    }
}

/// Why a message had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// No state, and the message cannot create one.
    NoState,
    /// A start message for an entity that already exists.
    DuplicateStart,
    /// The stored state belongs to another entity.
    EntityMismatch,
    /// The message was the last one applied.
    AlreadyApplied,
    /// The transition rejected the message.
    Rejected,
}

/// Outcome of [`Engine::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Applied,
    Discarded(Discard),
}

/// Applies messages for one state machine against a store.
///
/// Callers must not run two `handle` calls for the same entity id
/// concurrently; the runtime partitions messages by entity id to guarantee
/// it. The conditional write still catches a violation.
pub struct Engine<M, S, D> {
    store: S,
    dispatcher: D,
    _machine: PhantomData<fn() -> M>,
}

impl<M, S, D> Clone for Engine<M, S, D>
where
    S: Clone,
    D: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            _machine: PhantomData,
        }
    }
}

impl<M, S, D> Engine<M, S, D>
where
    M: StateMachine,
    S: StateStore,
    D: Dispatcher,
{
    pub fn new(store: S, dispatcher: D) -> Self {
        Self {
            store,
            dispatcher,
            _machine: PhantomData,
        }
    }

    /// Load the current state of `entity_id`.
    pub async fn state(&self, entity_id: &str) -> Result<Option<M::State>> {
        let key = StateKey::new(M::NAME, entity_id);
        match self.store.get_state(&key).await? {
            Some(value) => Ok(Some(decode_state::<M>(&key, value)?)),
            None => Ok(None),
        }
    }

    /// Apply one message.
    ///
    /// Protocol inconsistencies are logged and reported as
    /// [`Handled::Discarded`]; only storage and serialization failures are
    /// errors.
    pub async fn handle(&self, message: M::Message) -> Result<Handled> {
        let entity_id = message.entity_id();
        let message_id = message.message_id();
        let kind = message.kind();
        let key = StateKey::new(M::NAME, entity_id.as_str());

        let stored = self.store.get_state(&key).await?;

        let (state, stored) = match stored {
            Some(value) => {
                if M::is_start(&message) {
                    error!(
                        engine = M::NAME,
                        %entity_id,
                        %message_id,
                        kind,
                        "Start message for an existing entity, discarded"
                    );
                    return Ok(Handled::Discarded(Discard::DuplicateStart));
                }
                (decode_state::<M>(&key, value.clone())?, Some(value))
            }
            None => match M::initial_state(&message) {
                Some(state) => (state, None),
                None => {
                    info!(
                        engine = M::NAME,
                        %entity_id,
                        %message_id,
                        kind,
                        "No state for message, discarded"
                    );
                    return Ok(Handled::Discarded(Discard::NoState));
                }
            },
        };

        let state_id = M::state_id(&state);
        if state_id != entity_id {
            error!(
                engine = M::NAME,
                %entity_id,
                %state_id,
                %message_id,
                kind,
                "Message targets another entity than its state, discarded"
            );
            return Ok(Handled::Discarded(Discard::EntityMismatch));
        }

        if stored.is_some() && M::last_message_id(&state) == message_id {
            debug!(engine = M::NAME, %entity_id, %message_id, kind, "Message already applied");
            return Ok(Handled::Discarded(Discard::AlreadyApplied));
        }

        let ctx = TransitionContext {
            now: OffsetDateTime::now_utc(),
            created: stored.is_none(),
        };
        let previous = state.clone();
        let Transition { next, outputs } = M::transition(&ctx, state, message);

        match (next, stored) {
            (Next::Reject(reason), _) => {
                error!(
                    engine = M::NAME,
                    %entity_id,
                    %message_id,
                    kind,
                    reason,
                    "Message rejected"
                );
                return Ok(Handled::Discarded(Discard::Rejected));
            }
            (Next::Keep(mut next), None) => {
                M::set_last_message_id(&mut next, message_id);
                self.store
                    .create_state(&key, serde_json::to_value(&next)?)
                    .await?;
            }
            (Next::Keep(mut next), Some(stored)) => {
                M::set_last_message_id(&mut next, message_id);
                if next != previous {
                    self.store
                        .update_state(&key, serde_json::to_value(&next)?, &stored)
                        .await?;
                }
            }
            (Next::Terminate, None) => {}
            (Next::Terminate, Some(stored)) => {
                self.store.delete_state(&key, &stored).await?;
            }
        }

        debug!(
            engine = M::NAME,
            %entity_id,
            %message_id,
            kind,
            outputs = outputs.len(),
            "Message applied"
        );

        for output in outputs {
            self.dispatcher.dispatch(output.message, output.after);
        }

        Ok(Handled::Applied)
    }
}

fn decode_state<M: StateMachine>(key: &StateKey, value: serde_json::Value) -> Result<M::State> {
    serde_json::from_value(value).map_err(|e| Error::state_deserialization(M::NAME, key.id(), e))
}
