//! Partitioned message loops for stateful engines.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::Envelope;
use crate::engine::{Engine, StateMachine};
use crate::messages::Message;
use crate::store::StateStore;
use crate::transport::Dispatcher;

/// Lane for `entity_id` among `partitions` lanes.
pub(crate) fn partition(entity_id: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    entity_id.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Settings shared by all lanes of one engine.
#[derive(Debug, Clone)]
pub(crate) struct LaneConfig {
    pub partitions: usize,
    pub conflict_retry_delay: Duration,
}

/// Route an engine's inbox onto single-consumer lanes until shutdown.
///
/// Each lane applies its messages one at a time, so an entity never has two
/// messages in flight. On shutdown the router stops taking new messages and
/// the lanes finish what they already hold.
pub(crate) async fn run_engine<M, S, D>(
    engine: Engine<M, S, D>,
    dispatcher: D,
    mut inbox: UnboundedReceiver<M::Message>,
    config: LaneConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    M: StateMachine,
    M::Message: Into<Message>,
    S: StateStore,
    D: Dispatcher,
{
    let partitions = config.partitions.max(1);
    let mut lanes: Vec<UnboundedSender<M::Message>> = Vec::with_capacity(partitions);
    let mut handles = Vec::with_capacity(partitions);

    for _ in 0..partitions {
        let (tx, rx) = unbounded_channel();
        lanes.push(tx);
        handles.push(tokio::spawn(run_lane(
            engine.clone(),
            dispatcher.clone(),
            rx,
            config.conflict_retry_delay,
        )));
    }

    info!(engine = M::NAME, partitions, "Engine started");

    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(message) = message else {
                    break;
                };
                let lane = partition(&message.entity_id(), partitions);
                if lanes[lane].send(message).is_err() {
                    error!(engine = M::NAME, lane, "Lane stopped, message dropped");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(engine = M::NAME, "Engine shutting down");
                    break;
                }
            }
        }
    }

    drop(lanes);
    for handle in handles {
        let _ = handle.await;
    }
}

async fn run_lane<M, S, D>(
    engine: Engine<M, S, D>,
    dispatcher: D,
    mut lane: UnboundedReceiver<M::Message>,
    conflict_retry_delay: Duration,
) where
    M: StateMachine,
    M::Message: Into<Message>,
    S: StateStore,
    D: Dispatcher,
{
    while let Some(message) = lane.recv().await {
        let message_id = message.message_id();
        let entity_id = message.entity_id();
        let kind = message.kind();

        match engine.handle(message.clone()).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                warn!(
                    engine = M::NAME,
                    %entity_id,
                    %message_id,
                    kind,
                    "State changed concurrently, message re-queued"
                );
                dispatcher.dispatch(message.into(), Some(conflict_retry_delay));
            }
            Err(e) => {
                error!(
                    engine = M::NAME,
                    %entity_id,
                    %message_id,
                    kind,
                    error = %e,
                    "Error handling message, dropped"
                );
            }
        }
    }
}
