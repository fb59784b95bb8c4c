//! The runtime over a durable [`PgStore`].

use std::time::Duration;

use test_utils::db_test;
use tideflow::store::PgStore;
use tideflow::{CallCapture, Runtime, RuntimeConfig, Task, TaskError, TaskMeta, TaskOptions};
use tokio::sync::oneshot;

const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

db_test!(task_completes_over_postgres, |pool| {
    let doubler = Task::new().method("double", |_ctx, (n,): (i64,)| async move {
        Ok::<_, TaskError>(n * 2)
    });
    let runtime = Runtime::builder(PgStore::new(pool.clone()))
        .task("doubler", doubler)
        .config(RuntimeConfig {
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .build()?;
    let handle = runtime.handle();
    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(runtime.run(async {
        let _ = stopped.await;
    }));

    let mut call = CallCapture::begin("doubler");
    call.call::<_, i64>("double", (21_i64,))?;
    let task_id = handle
        .client()
        .dispatch_task(call, TaskOptions::default(), TaskMeta::new())?;

    let counts = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            if let Some(counts) = handle.task_counts("doubler").await? {
                if counts.terminated_completed == 1 {
                    return tideflow::Result::Ok(counts);
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await??;
    assert_eq!(counts.running_ok, 0);
    assert!(handle.task_state(task_id).await?.is_none());

    // Terminated tasks leave no row behind; monitoring rows remain.
    let rows: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM tideflow.states WHERE namespace = 'task-engine'",
    )
    .fetch_one(pool)
    .await?;
    assert_eq!(rows, 0);

    let names: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM tideflow.states WHERE namespace = 'monitoring-per-name'",
    )
    .fetch_all(pool)
    .await?;
    assert_eq!(names, ["doubler"]);

    let _ = stop.send(());
    running.await??;
    Ok(())
});
