//! The contract every inbound message honours.

use crate::id::MessageId;

/// Routing and deduplication metadata carried by every message.
///
/// Derive it with [`macro@crate::Envelope`]:
///
/// ```ignore
/// #[derive(Envelope)]
/// #[envelope(entity = task_id)]   // default field for all variants
/// enum TaskEngineMessage {
///     TaskDispatched { message_id: MessageId, task_id: TaskId, .. },
///     #[envelope(entity = "global")]  // constant entity for this variant
///     Ping { message_id: MessageId },
/// }
/// ```
pub trait Envelope {
    /// Unique id of this message. Redelivery keeps the id.
    fn message_id(&self) -> MessageId;

    /// Id of the entity whose state this message targets.
    ///
    /// All messages for one entity id are applied one at a time.
    fn entity_id(&self) -> String;

    /// Variant name, for logs.
    fn kind(&self) -> &'static str;
}
