use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::PipelineError;
use crate::fs::FsSnapshot;
use crate::relay::SharedStdin;
use crate::resolver::{CompiledModule, StageDescriptor};

use super::context::{ExecutionContext, WorkerImage};
use super::events::StageEmitter;
use super::io::SharedIo;
use super::panic_message;

/// Runs a compiled module on its own execution context, reading stdin from
/// a shared ring buffer so it can overlap with its producer.
pub struct ConcurrentBackend {
    descriptor: StageDescriptor,
    module: CompiledModule,
    image: Arc<dyn WorkerImage>,
    stdin: Arc<SharedStdin>,
    emitter: StageEmitter,
    snapshot: Option<FsSnapshot>,
    context: Option<ExecutionContext>,
}

impl ConcurrentBackend {
    pub(crate) fn new(
        descriptor: StageDescriptor,
        module: CompiledModule,
        image: Arc<dyn WorkerImage>,
        stdin_capacity: usize,
        snapshot: FsSnapshot,
        emitter: StageEmitter,
    ) -> Self {
        Self {
            descriptor,
            module,
            image,
            stdin: Arc::new(SharedStdin::new(stdin_capacity)),
            emitter,
            snapshot: Some(snapshot),
            context: None,
        }
    }

    pub fn stdin(&self) -> &Arc<SharedStdin> {
        &self.stdin
    }

    pub fn is_started(&self) -> bool {
        self.context.is_some()
    }

    pub fn start(&mut self, initial_stdin: Option<Bytes>) -> Result<(), PipelineError> {
        let Some(snapshot) = self.snapshot.take() else {
            return Ok(());
        };
        let command = self.descriptor.command().to_string();

        if let Some(data) = initial_stdin {
            self.stdin
                .write(&data)
                .map_err(|e| PipelineError::runtime(&command, e.to_string()))?;
        }

        let program = self.module.program().clone();
        let emitter = self.emitter.clone();
        let original = snapshot.clone();
        let mut io = SharedIo::new(
            self.descriptor.argv.clone(),
            self.descriptor.env.clone(),
            self.stdin.clone(),
            emitter.clone(),
            snapshot,
        );

        let job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| program.run(&mut io)));
            let fs = io.into_fs();
            let changed = (fs != original).then_some(fs);
            match result {
                Ok(Ok(())) => {
                    emitter.end(changed);
                }
                Ok(Err(e)) => {
                    emitter.error(format!("{e:#}"), changed);
                }
                Err(panic) => {
                    emitter.error(panic_message(panic.as_ref()), changed);
                }
            }
        });

        let label = format!("stage-{}-{}", self.emitter.index(), command);
        let context = self
            .image
            .launch(label, job)
            .map_err(|e| PipelineError::runtime(&command, format!("launch failed: {e}")))?;
        tracing::debug!(
            stage = self.emitter.index(),
            command = %command,
            image = self.image.name(),
            context = context.label(),
            "stage launched on concurrent backend"
        );
        self.context = Some(context);
        Ok(())
    }

    pub fn terminate(&mut self) {
        self.emitter.cancel();
        self.stdin.terminate();
        if let Some(mut context) = self.context.take() {
            context.terminate();
        }
    }
}
