//! Structured log output of a running runtime.

use std::sync::{Arc, Mutex};

use tideflow::{
    CallCapture, MemoryStore, Runtime, Task, TaskError, TaskMeta, TaskOptions, TaskStatus,
};

use crate::support::{Running, eventually};

#[derive(Default)]
struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_attempt_is_logged_with_cause() -> anyhow::Result<()> {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer_buffer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || BufferWriter {
            buffer: Arc::clone(&writer_buffer),
        })
        .with_ansi(false)
        .finish();

    let _guard = tracing::subscriber::set_default(subscriber);

    let refusing = Task::new().method("charge", |_ctx, (card,): (String,)| async move {
        Err::<(), _>(TaskError::new("CardDeclined", format!("card {card} declined")))
    });
    let running = Running::start(Runtime::builder(MemoryStore::new()).task("billing", refusing))?;

    let mut call = CallCapture::begin("billing");
    call.call::<_, ()>("charge", ("4242".to_string(),))?;
    let task_id = running
        .handle
        .client()
        .dispatch_task(call, TaskOptions::default(), TaskMeta::new())?;

    eventually("billing to be in error", || async {
        let state = running.handle.task_state(task_id).await?;
        Ok(state.filter(|state| state.task_status == TaskStatus::RunningError))
    })
    .await?;
    running.shutdown().await?;

    let locked = buffer.lock().unwrap();
    let output = String::from_utf8_lossy(&locked);
    assert!(output.contains("Runtime starting"));
    assert!(output.contains("worker_id=test-worker"));
    assert!(output.contains("Task attempt failed"));
    assert!(output.contains("CardDeclined"));
    assert!(output.contains("Runtime stopped gracefully"));
    Ok(())
}
