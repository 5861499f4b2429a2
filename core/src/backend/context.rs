use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;

pub type StageJob = Box<dyn FnOnce() + Send + 'static>;

/// Launches isolated execution contexts for concurrent stages.
pub trait WorkerImage: Send + Sync {
    fn name(&self) -> &str;
    fn launch(&self, label: String, job: StageJob) -> std::io::Result<ExecutionContext>;
}

/// Fetches the worker image. Called at most once per cache lifetime by
/// `BackendFactory`.
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn describe(&self) -> String;
    async fn fetch(&self) -> anyhow::Result<Arc<dyn WorkerImage>>;
}

/// A launched context. Dropping or terminating it detaches the context; its
/// stage is expected to stop at its next I/O call once its channels are torn
/// down. A program that never touches its I/O keeps its thread busy until it
/// returns on its own.
pub struct ExecutionContext {
    label: String,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    pub fn from_thread(label: String, thread: JoinHandle<()>) -> Self {
        Self {
            label,
            thread: Some(thread),
        }
    }

    /// A context with nothing to join, for images that run jobs elsewhere.
    pub fn detached(label: String) -> Self {
        Self {
            label,
            thread: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Detaches the thread. It is not interrupted.
    pub fn terminate(&mut self) {
        if self.thread.take().is_some() {
            tracing::debug!(context = %self.label, "execution context detached");
        }
    }
}

/// Runs each stage on its own named OS thread.
pub struct ThreadImage {
    stack_bytes: usize,
}

impl ThreadImage {
    pub fn new(stack_bytes: usize) -> Self {
        Self { stack_bytes }
    }
}

impl WorkerImage for ThreadImage {
    fn name(&self) -> &str {
        "thread"
    }

    fn launch(&self, label: String, job: StageJob) -> std::io::Result<ExecutionContext> {
        let thread = std::thread::Builder::new()
            .name(label.clone())
            .stack_size(self.stack_bytes)
            .spawn(job)?;
        Ok(ExecutionContext::from_thread(label, thread))
    }
}

pub struct ThreadContextSource {
    stack_bytes: usize,
}

impl ThreadContextSource {
    pub fn new(stack_bytes: usize) -> Self {
        Self { stack_bytes }
    }
}

#[async_trait]
impl ContextSource for ThreadContextSource {
    fn describe(&self) -> String {
        format!("thread worker (stack {} bytes)", self.stack_bytes)
    }

    async fn fetch(&self) -> anyhow::Result<Arc<dyn WorkerImage>> {
        Ok(Arc::new(ThreadImage::new(self.stack_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn terminated_context_is_detached_not_interrupted() {
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();
        let image = ThreadImage::new(64 * 1024);
        let mut context = image
            .launch(
                "busy".into(),
                Box::new(move || {
                    let _ = go_rx.recv();
                    let _ = done_tx.send("finished");
                }),
            )
            .unwrap();
        assert!(!context.is_finished());

        context.terminate();
        assert!(context.is_finished());

        go_tx.send(()).unwrap();
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "finished"
        );
    }
}
