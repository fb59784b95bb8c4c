//! Runtime configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Configuration for the in-process runtime.
///
/// Controls engine parallelism, executor concurrency, caching, and shutdown.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tideflow::runtime::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     engine_partitions: 8,       // 8 lanes per engine
///     executor_concurrency: 64,   // up to 64 task attempts at once
///     shutdown_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of lanes per stateful engine.
    ///
    /// Messages are routed to a lane by entity id, so each entity is handled
    /// by one lane at a time while different entities proceed in parallel.
    /// Default: 4.
    pub engine_partitions: usize,

    /// Maximum number of task attempts running at once.
    ///
    /// Further attempts wait for a slot. Default: 16.
    pub executor_concurrency: usize,

    /// Number of states kept in the write-through cache.
    ///
    /// Default: 10 000.
    pub state_cache_capacity: NonZeroUsize,

    /// Delay before a message that lost an optimistic write is applied again.
    ///
    /// Default: 10ms.
    pub conflict_retry_delay: Duration,

    /// Delay before a decision whose workflow code failed is computed again.
    ///
    /// Default: 1s.
    pub decision_retry_delay: Duration,

    /// Maximum time to wait for lanes and running attempts during shutdown.
    ///
    /// After this timeout, the runtime will force stop.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Worker identifier, used in logs.
    ///
    /// If `None`, a UUID is generated when the runtime is built.
    pub worker_id: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine_partitions: 4,
            executor_concurrency: 16,
            state_cache_capacity: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
            conflict_retry_delay: Duration::from_millis(10),
            decision_retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            worker_id: None,
        }
    }
}
