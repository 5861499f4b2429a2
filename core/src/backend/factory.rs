use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::fs::FsSnapshot;
use crate::relay::DEFAULT_SHARED_STDIN_BYTES;
use crate::resolver::{Executable, StageDescriptor};
use crate::terminal::OutputSink;

use super::concurrent::ConcurrentBackend;
use super::context::{ContextSource, WorkerImage};
use super::events::StageEmitter;
use super::in_process::InProcessBackend;
use super::{BackendKind, ExecutionBackend};

/// Picks the backend for one stage. Only compiled modules can stream, and
/// only when shared-memory concurrency is available.
pub fn select_backend(executable: &Executable, shared_memory: bool) -> BackendKind {
    match executable {
        Executable::Module(_) if shared_memory => BackendKind::Concurrent,
        _ => BackendKind::InProcess,
    }
}

/// Builds execution backends and owns the worker-image cache.
///
/// The image is fetched from the `ContextSource` the first time a concurrent
/// stage is spawned and reused until `reset_cache` is called.
pub struct BackendFactory {
    source: Option<Arc<dyn ContextSource>>,
    image: Mutex<Option<Arc<dyn WorkerImage>>>,
    shared_memory: bool,
    stdin_capacity: usize,
    fetches: AtomicUsize,
}

impl BackendFactory {
    pub fn new(source: Option<Arc<dyn ContextSource>>, shared_memory: bool) -> Self {
        Self {
            source,
            image: Mutex::new(None),
            shared_memory,
            stdin_capacity: DEFAULT_SHARED_STDIN_BYTES,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Factory for environments without shared-memory concurrency: every
    /// stage runs in-process.
    pub fn in_process_only() -> Self {
        Self::new(None, false)
    }

    pub fn with_stdin_capacity(mut self, bytes: usize) -> Self {
        self.stdin_capacity = bytes.max(1);
        self
    }

    pub fn supports_shared_memory(&self) -> bool {
        self.shared_memory
    }

    /// Number of times the worker image has been fetched.
    pub fn image_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn reset_cache(&self) {
        self.image.lock().await.take();
    }

    async fn worker_image(
        &self,
        sink: Option<&dyn OutputSink>,
    ) -> Result<Arc<dyn WorkerImage>, PipelineError> {
        let mut cached = self.image.lock().await;
        if let Some(image) = cached.as_ref() {
            return Ok(image.clone());
        }

        let source = self.source.as_ref().ok_or_else(|| {
            PipelineError::BackendConfig("no execution context source configured".into())
        })?;

        if let Some(sink) = sink {
            sink.print_status("[INFO] Preparing the stage execution context (this happens once)...");
        }
        let fetched = source.fetch().await;
        if let Some(sink) = sink {
            sink.clear_status();
        }

        let image = fetched.map_err(|e| {
            PipelineError::BackendConfig(format!("fetching {} failed: {e:#}", source.describe()))
        })?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::info!(source = %source.describe(), image = image.name(), "worker image ready");
        *cached = Some(image.clone());
        Ok(image)
    }

    pub async fn spawn(
        &self,
        descriptor: StageDescriptor,
        snapshot: FsSnapshot,
        emitter: StageEmitter,
        sink: Option<&dyn OutputSink>,
    ) -> Result<ExecutionBackend, PipelineError> {
        match (
            select_backend(&descriptor.executable, self.shared_memory),
            &descriptor.executable,
        ) {
            (BackendKind::Concurrent, Executable::Module(module)) => {
                let module = module.clone();
                let image = self.worker_image(sink).await?;
                Ok(ExecutionBackend::Concurrent(ConcurrentBackend::new(
                    descriptor,
                    module,
                    image,
                    self.stdin_capacity,
                    snapshot,
                    emitter,
                )))
            }
            _ => Ok(ExecutionBackend::InProcess(InProcessBackend::new(
                descriptor, snapshot, emitter,
            ))),
        }
    }
}
