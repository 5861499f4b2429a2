//! Execution backends for pipeline stages.
//!
//! A stage runs either on its own execution context (`ConcurrentBackend`,
//! streaming stdin through a `SharedStdin`) or inline on the control task
//! (`InProcessBackend`, stdin materialised up front). Both report back
//! through a `StageEmitter`.

mod concurrent;
mod context;
mod events;
mod factory;
mod in_process;
mod io;

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::PipelineError;
use crate::relay::SharedStdin;

pub use concurrent::ConcurrentBackend;
pub use context::{
    ContextSource, ExecutionContext, StageJob, ThreadContextSource, ThreadImage, WorkerImage,
};
pub use events::{StageEmitter, StageEvent, StageEventKind};
pub use factory::{select_backend, BackendFactory};
pub use in_process::InProcessBackend;
pub use io::{read_all_stdin, LineReader, StageIo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Concurrent,
    InProcess,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Concurrent => "concurrent",
            BackendKind::InProcess => "in_process",
        }
    }
}

pub enum ExecutionBackend {
    Concurrent(ConcurrentBackend),
    InProcess(InProcessBackend),
}

impl ExecutionBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            ExecutionBackend::Concurrent(_) => BackendKind::Concurrent,
            ExecutionBackend::InProcess(_) => BackendKind::InProcess,
        }
    }

    /// Starts the stage with whatever input was accumulated for it. For an
    /// in-process stage this returns after the stage has run to completion.
    pub async fn start(&mut self, initial_stdin: Option<Bytes>) -> Result<(), PipelineError> {
        match self {
            ExecutionBackend::Concurrent(b) => b.start(initial_stdin),
            ExecutionBackend::InProcess(b) => {
                b.start(initial_stdin).await;
                Ok(())
            }
        }
    }

    pub fn terminate(&mut self) {
        match self {
            ExecutionBackend::Concurrent(b) => b.terminate(),
            ExecutionBackend::InProcess(b) => b.terminate(),
        }
    }

    /// The streaming stdin channel, present only on concurrent stages.
    pub fn shared_stdin(&self) -> Option<&Arc<SharedStdin>> {
        match self {
            ExecutionBackend::Concurrent(b) => Some(b.stdin()),
            ExecutionBackend::InProcess(_) => None,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
