//! Standalone tasks dispatched through the client.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tideflow::{
    CallCapture, MemoryStore, Runtime, Task, TaskError, TaskMeta, TaskOptions, TaskStatus,
};

use crate::support::{Running, eventually};

fn call(task_name: &str, method: &str, arg: &str) -> anyhow::Result<CallCapture> {
    let mut capture = CallCapture::begin(task_name);
    capture.call::<_, String>(method, (arg.to_string(),))?;
    Ok(capture)
}

async fn completed_count(running: &Running, task_name: &str) -> anyhow::Result<u64> {
    let counts = running.handle.task_counts(task_name).await?;
    Ok(counts.map(|counts| counts.terminated_completed).unwrap_or_default())
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test]
async fn dispatched_task_runs_and_is_counted() -> anyhow::Result<()> {
    let greeted = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&greeted);
    let greeter = Task::new().method("greet", move |_ctx, (name,): (String,)| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(name.clone());
            Ok::<_, TaskError>(format!("hello {name}"))
        }
    });

    let running = Running::start(Runtime::builder(MemoryStore::new()).task("greeter", greeter))?;
    let task_id = running.handle.client().dispatch_task(
        call("greeter", "greet", "ada")?,
        TaskOptions::default(),
        TaskMeta::new(),
    )?;

    eventually("greeter to complete", || async {
        Ok((completed_count(&running, "greeter").await? == 1).then_some(()))
    })
    .await?;

    assert_eq!(*greeted.lock().unwrap(), ["ada"]);
    assert!(running.handle.task_state(task_id).await?.is_none());

    let counts = running.handle.task_counts("greeter").await?.unwrap();
    assert_eq!(counts.running_ok, 0);
    assert_eq!(counts.running_error, 0);

    let names = eventually("task name to be announced", || async {
        let names = running.handle.task_names().await?;
        Ok((!names.is_empty()).then_some(names))
    })
    .await?;
    assert!(names.contains("greeter"));

    running.shutdown().await
}

// =============================================================================
// Failures and retries
// =============================================================================

#[tokio::test]
async fn failed_attempt_is_retried_after_delay() -> anyhow::Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = Task::new()
        .method("fetch", move |ctx, (url,): (String,)| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if ctx.task_attempt_index.0 == 0 {
                    return Err(TaskError::new("Unavailable", format!("{url} is down")));
                }
                Ok(url.len())
            }
        })
        .retry_delay(|ctx| Ok(ctx.failure().map(|_| 0.01)));

    let running = Running::start(Runtime::builder(MemoryStore::new()).task("flaky", flaky))?;
    running.handle.client().dispatch_task(
        call("flaky", "fetch", "https://example.com")?,
        TaskOptions::default(),
        TaskMeta::new(),
    )?;

    eventually("flaky to complete", || async {
        Ok((completed_count(&running, "flaky").await? == 1).then_some(()))
    })
    .await?;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let counts = running.handle.task_counts("flaky").await?.unwrap();
    assert_eq!(counts.running_warning, 0);

    running.shutdown().await
}

#[tokio::test]
async fn terminal_failure_waits_for_manual_retry() -> anyhow::Result<()> {
    let strict = Task::new().method("check", |ctx, (value,): (String,)| async move {
        if ctx.task_retry.0 == 0 {
            return Err(TaskError::new("Rejected", format!("{value} rejected")));
        }
        Ok(value)
    });

    let running = Running::start(Runtime::builder(MemoryStore::new()).task("strict", strict))?;
    let client = running.handle.client();
    let task_id = client.dispatch_task(
        call("strict", "check", "x")?,
        TaskOptions::default(),
        TaskMeta::new(),
    )?;

    let state = eventually("strict to be in error", || async {
        let state = running.handle.task_state(task_id).await?;
        Ok(state.filter(|state| state.task_status == TaskStatus::RunningError))
    })
    .await?;
    let error = state.previous_task_attempt_error.unwrap();
    assert_eq!(error.cause(), "Rejected");

    client.retry_task(task_id);

    eventually("strict to complete after retry", || async {
        Ok((completed_count(&running, "strict").await? == 1).then_some(()))
    })
    .await?;
    let counts = running.handle.task_counts("strict").await?.unwrap();
    assert_eq!(counts.running_error, 0);

    running.shutdown().await
}

#[tokio::test]
async fn unregistered_task_ends_in_error() -> anyhow::Result<()> {
    let running = Running::start(Runtime::builder(MemoryStore::new()))?;
    let task_id = running.handle.client().dispatch_task(
        call("missing", "run", "x")?,
        TaskOptions::default(),
        TaskMeta::new(),
    )?;

    let state = eventually("missing to be in error", || async {
        let state = running.handle.task_state(task_id).await?;
        Ok(state.filter(|state| state.task_status == TaskStatus::RunningError))
    })
    .await?;
    assert_eq!(state.previous_task_attempt_error.unwrap().cause(), "TaskNotFound");

    running.shutdown().await
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn canceled_task_stops_running_attempt() -> anyhow::Result<()> {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    let slow = Task::new().method("wait", move |_ctx, (_label,): (String,)| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, TaskError>(())
        }
    });

    let running = Running::start(Runtime::builder(MemoryStore::new()).task("slow", slow))?;
    let client = running.handle.client();
    let task_id = client.dispatch_task(
        call("slow", "wait", "forever")?,
        TaskOptions::default(),
        TaskMeta::new(),
    )?;

    eventually("slow to start", || async {
        Ok(started.load(Ordering::SeqCst).then_some(()))
    })
    .await?;
    client.cancel_task(task_id, &"stopped")?;

    eventually("slow to be canceled", || async {
        let counts = running.handle.task_counts("slow").await?;
        Ok(counts.filter(|counts| counts.terminated_canceled == 1))
    })
    .await?;
    assert!(running.handle.task_state(task_id).await?.is_none());

    running.shutdown().await
}
