use std::future::Future;
use std::time::Duration;

use tideflow::runtime::RuntimeBuilder;
use tideflow::{MemoryStore, RuntimeConfig, RuntimeHandle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A runtime running in the background.
pub struct Running {
    pub handle: RuntimeHandle<MemoryStore>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<tideflow::Result<()>>,
}

impl Running {
    /// Build and run the runtime with a configuration suited to tests.
    pub fn start(builder: RuntimeBuilder<MemoryStore>) -> anyhow::Result<Self> {
        let runtime = builder
            .config(RuntimeConfig {
                engine_partitions: 2,
                executor_concurrency: 4,
                conflict_retry_delay: Duration::from_millis(1),
                decision_retry_delay: Duration::from_millis(10),
                shutdown_timeout: Duration::from_secs(5),
                worker_id: Some("test-worker".into()),
                ..Default::default()
            })
            .build()?;
        let handle = runtime.handle();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(runtime.run(async {
            let _ = stopped.await;
        }));

        Ok(Self { handle, stop, task })
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.task.await??;
        Ok(())
    }
}

/// Poll `probe` until it yields a value, failing after [`DEFAULT_TEST_TIMEOUT`].
pub async fn eventually<T, F, Fut>(what: &str, mut probe: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let polled = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            if let Some(value) = probe().await? {
                return anyhow::Ok(value);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    match polled {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out waiting for {what}"),
    }
}
