use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::ast::CommandParser;
use crate::backend::BackendFactory;
use crate::error::PipelineError;
use crate::fs::Filesystem;
use crate::resolver::{CommandFetcher, ModuleCompiler};
use crate::terminal::{OutputSink, StdinReader};

/// Maximum number of stages resident at once.
pub const SPAWN_WINDOW: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Failed(PipelineError),
    Killed,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Completed)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// What a pipeline run amounted to. Handed to the completion callback and
/// returned from `CommandRunner::run_command`.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub command: String,
    pub outcome: PipelineOutcome,
    pub stages_total: usize,
    pub stages_spawned: usize,
    pub max_resident: usize,
    pub fs_merges: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub type CompletionCallback = Box<dyn FnOnce(&PipelineReport) + Send + 'static>;

/// Cancels a pipeline run from outside its control task.
///
/// Cloneable and usable before, during or after the run; only the first
/// request has any effect.
#[derive(Clone)]
pub struct KillSwitch {
    tx: Arc<watch::Sender<bool>>,
}

impl KillSwitch {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn kill(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_killed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct RunnerContext {
    pub parser: Arc<dyn CommandParser>,
    pub fetcher: Arc<dyn CommandFetcher>,
    pub compiler: Option<Arc<dyn ModuleCompiler>>,
    pub fs: Arc<dyn Filesystem>,
    pub backends: Arc<BackendFactory>,
    pub sink: Option<Arc<dyn OutputSink>>,
    pub stdin_reader: Option<Arc<dyn StdinReader>>,
    pub merge_on_error: bool,
}

impl RunnerContext {
    pub fn new(
        parser: Arc<dyn CommandParser>,
        fetcher: Arc<dyn CommandFetcher>,
        fs: Arc<dyn Filesystem>,
        backends: Arc<BackendFactory>,
    ) -> Self {
        Self {
            parser,
            fetcher,
            compiler: None,
            fs,
            backends,
            sink: None,
            stdin_reader: None,
            merge_on_error: true,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn ModuleCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_stdin_reader(mut self, reader: Arc<dyn StdinReader>) -> Self {
        self.stdin_reader = Some(reader);
        self
    }

    pub fn with_merge_on_error(mut self, merge: bool) -> Self {
        self.merge_on_error = merge;
        self
    }
}
