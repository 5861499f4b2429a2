use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::backend::{ExecutionBackend, StageEmitter, StageEvent, StageEventKind};
use crate::error::PipelineError;
use crate::fs::FsSnapshot;
use crate::relay::StdinAccumulator;
use crate::resolver::{resolve_stages, ResolveContext, StageDescriptor};

use super::types::{
    CompletionCallback, KillSwitch, PipelineOutcome, PipelineReport, RunnerContext, SPAWN_WINDOW,
};

struct StageHandle {
    index: usize,
    command: String,
    backend: ExecutionBackend,
}

/// An outstanding `StdinReader::read_line` for stage 0.
type LineRead = Pin<Box<dyn Future<Output = Option<String>> + Send>>;

#[derive(Debug, Default, Clone, Copy)]
struct RunStats {
    spawned: usize,
    max_resident: usize,
    fs_merges: usize,
}

/// Runs one command line as a pipeline of stages.
///
/// Stages are spawned through a window of `SPAWN_WINDOW`: stage `i + 1` is
/// started ahead of time only when it can stream (concurrent backend and not
/// a callback), otherwise it waits for stage `i` to end and receives its
/// whole output at once. All bookkeeping happens on the task driving
/// `run_command`; stages talk back only through `StageEvent`s.
pub struct CommandRunner {
    ctx: RunnerContext,
    command: String,
    run_id: String,
    stages: Vec<Option<StageDescriptor>>,
    callbacks: Vec<bool>,
    finished: Vec<bool>,
    resident: Vec<StageHandle>,
    pending: StdinAccumulator,
    next_spawn: usize,
    running: bool,
    started: bool,
    stdin_wanted: bool,
    outcome: Option<PipelineOutcome>,
    on_complete: Option<CompletionCallback>,
    report: Option<PipelineReport>,
    kill_switch: KillSwitch,
    kill_rx: watch::Receiver<bool>,
    events_tx: mpsc::UnboundedSender<StageEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<StageEvent>>,
    stats: RunStats,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
}

async fn kill_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|killed| *killed).await;
}

impl CommandRunner {
    pub fn new(ctx: RunnerContext, command: impl Into<String>) -> Self {
        let (kill_switch, kill_rx) = KillSwitch::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            command: command.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            stages: Vec::new(),
            callbacks: Vec::new(),
            finished: Vec::new(),
            resident: Vec::new(),
            pending: StdinAccumulator::new(),
            next_spawn: 0,
            running: false,
            started: false,
            stdin_wanted: false,
            outcome: None,
            on_complete: None,
            report: None,
            kill_switch,
            kill_rx,
            events_tx,
            events_rx: Some(events_rx),
            stats: RunStats::default(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Registers the completion callback. It fires exactly once per run.
    pub fn on_complete(mut self, f: impl FnOnce(&PipelineReport) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.kill_switch.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn report(&self) -> Option<&PipelineReport> {
        self.report.as_ref()
    }

    /// Parses, resolves and runs the command until the pipeline completes,
    /// fails or is killed. A second call returns the first run's report.
    #[tracing::instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run_command(&mut self) -> PipelineReport {
        if self.started {
            if let Some(report) = &self.report {
                return report.clone();
            }
        }
        self.started = true;
        self.started_at = Utc::now();
        self.clock = Instant::now();

        let stages = match self.prepare().await {
            Ok(stages) => stages,
            Err(e) => {
                if let Some(sink) = &self.ctx.sink {
                    sink.print(&format!("conduit: parse error ({e})\n"));
                }
                tracing::warn!(error.kind = e.kind(), error.message = %e, command = %self.command, "pipeline failed to start");
                self.outcome = Some(PipelineOutcome::Failed(e));
                return self.complete();
            }
        };

        let n = stages.len();
        self.callbacks = stages.iter().map(StageDescriptor::is_callback).collect();
        self.stages = stages.into_iter().map(Some).collect();
        self.finished = vec![false; n];
        self.running = true;
        tracing::info!(stages = n, streaming = self.ctx.backends.supports_shared_memory(), "pipeline started");

        let Some(mut events_rx) = self.events_rx.take() else {
            return self.complete();
        };
        let mut kill_rx = self.kill_rx.clone();

        if *kill_rx.borrow_and_update() {
            self.kill();
        } else {
            self.spawn_window(0).await;
        }

        let mut stdin_read: Option<LineRead> = None;
        while self.running {
            if std::mem::take(&mut self.stdin_wanted) && stdin_read.is_none() {
                if let Some(reader) = self.ctx.stdin_reader.clone() {
                    stdin_read = Some(Box::pin(async move { reader.read_line().await }));
                }
            }
            tokio::select! {
                biased;
                _ = kill_requested(&mut kill_rx) => {
                    tracing::info!("pipeline kill requested");
                    self.kill();
                }
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.kill(),
                },
                line = async {
                    match stdin_read.as_mut() {
                        Some(read) => read.await,
                        None => std::future::pending().await,
                    }
                }, if stdin_read.is_some() => {
                    stdin_read = None;
                    self.on_stdin_line(line);
                }
            }
        }

        match &self.report {
            Some(report) => report.clone(),
            None => self.complete(),
        }
    }

    async fn prepare(&self) -> Result<Vec<StageDescriptor>, PipelineError> {
        let nodes = self
            .ctx
            .parser
            .parse(&self.command)
            .map_err(|e| PipelineError::parse(format!("{e:#}")))?;
        let ctx = ResolveContext {
            fetcher: self.ctx.fetcher.as_ref(),
            compiler: self.ctx.compiler.as_deref(),
            sink: self.ctx.sink.as_deref(),
        };
        resolve_stages(&nodes, &ctx).await
    }

    /// Terminates every resident stage and completes the run. No-op unless
    /// the run is active; safe to call repeatedly.
    pub fn kill(&mut self) {
        if !self.running {
            return;
        }
        for handle in self.resident.iter_mut() {
            tracing::debug!(stage = handle.index, command = %handle.command, "terminating stage");
            handle.backend.terminate();
        }
        self.resident.clear();
        self.stages.clear();
        self.pending.clear();
        self.running = false;
        if self.outcome.is_none() {
            self.outcome = Some(PipelineOutcome::Killed);
        }
        self.complete();
    }

    fn complete(&mut self) -> PipelineReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let report = PipelineReport {
            run_id: self.run_id.clone(),
            command: self.command.clone(),
            outcome: self.outcome.take().unwrap_or(PipelineOutcome::Completed),
            stages_total: self.finished.len(),
            stages_spawned: self.stats.spawned,
            max_resident: self.stats.max_resident,
            fs_merges: self.stats.fs_merges,
            started_at: self.started_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
        };
        tracing::info!(
            outcome = ?report.outcome,
            stages_spawned = report.stages_spawned,
            max_resident = report.max_resident,
            fs_merges = report.fs_merges,
            duration_ms = report.duration_ms,
            "pipeline complete"
        );
        self.report = Some(report.clone());
        if let Some(callback) = self.on_complete.take() {
            callback(&report);
        }
        report
    }

    fn stage_count(&self) -> usize {
        self.finished.len()
    }

    fn resident_position(&self, index: usize) -> Option<usize> {
        self.resident.iter().position(|h| h.index == index)
    }

    fn resident_stage(&self, index: usize) -> Option<&StageHandle> {
        self.resident.iter().find(|h| h.index == index)
    }

    /// Whether `index` may stream from its predecessor, i.e. be spawned
    /// before the predecessor ends.
    fn can_spawn_ahead(&self, index: usize) -> bool {
        index < self.stage_count()
            && self.ctx.backends.supports_shared_memory()
            && !self.callbacks[index]
    }

    async fn spawn_window(&mut self, mut index: usize) {
        while self.running
            && index >= self.next_spawn
            && self.resident.len() < SPAWN_WINDOW
            && index < self.stage_count()
        {
            self.spawn_stage(index).await;
            index += 1;
            if !self.can_spawn_ahead(index) {
                break;
            }
        }
    }

    async fn spawn_stage(&mut self, index: usize) {
        let Some(descriptor) = self.stages.get_mut(index).and_then(Option::take) else {
            return;
        };
        let command = descriptor.command().to_string();
        let snapshot = self.ctx.fs.export_snapshot();
        let emitter = StageEmitter::new(index, self.events_tx.clone());
        let backends = self.ctx.backends.clone();
        let sink = self.ctx.sink.clone();

        self.next_spawn = index + 1;
        let mut backend = match backends
            .spawn(descriptor, snapshot, emitter, sink.as_deref())
            .await
        {
            Ok(backend) => backend,
            Err(e) => {
                self.fail_stage(&command, e, None);
                return;
            }
        };
        self.stats.spawned += 1;
        tracing::debug!(stage = index, command = %command, backend = backend.kind().as_str(), "stage spawned");

        let initial = self.pending.take();
        if let Err(e) = backend.start(initial).await {
            backend.terminate();
            self.fail_stage(&command, e, None);
            return;
        }

        let stdin_done = if index == 0 {
            self.ctx.stdin_reader.is_none()
        } else {
            self.finished[index - 1]
        };
        if stdin_done {
            if let Some(stdin) = backend.shared_stdin() {
                stdin.close();
            }
        }

        self.resident.push(StageHandle {
            index,
            command,
            backend,
        });
        self.stats.max_resident = self.stats.max_resident.max(self.resident.len());
    }

    async fn handle_event(&mut self, event: StageEvent) {
        if !self.running || self.resident_position(event.index).is_none() {
            tracing::trace!(stage = event.index, "dropping event from non-resident stage");
            return;
        }
        match event.kind {
            StageEventKind::Data(data) => self.on_data(event.index, data),
            StageEventKind::End(snapshot) => self.on_end(event.index, snapshot).await,
            StageEventKind::Error { message, snapshot } => {
                let command = self
                    .resident_stage(event.index)
                    .map(|h| h.command.clone())
                    .unwrap_or_default();
                let error = PipelineError::runtime(&command, message);
                self.fail_stage(&command, error, snapshot);
            }
            StageEventKind::StdinRequest => self.on_stdin_request(event.index),
        }
    }

    fn on_data(&mut self, index: usize, data: Bytes) {
        let next = index + 1;
        if next == self.stage_count() {
            if let Some(sink) = &self.ctx.sink {
                sink.print(&String::from_utf8_lossy(&data));
            }
            return;
        }
        if self.finished[next] {
            tracing::trace!(stage = index, bytes = data.len(), "consumer finished, discarding output");
            return;
        }
        if self.ctx.backends.supports_shared_memory() {
            if let Some(stdin) = self.resident_stage(next).and_then(|h| h.backend.shared_stdin()) {
                if let Err(e) = stdin.write(&data) {
                    tracing::debug!(stage = next, error = %e, "relay write rejected");
                }
                return;
            }
        }
        self.pending.append(&data);
    }

    async fn on_end(&mut self, index: usize, snapshot: Option<FsSnapshot>) {
        self.finished[index] = true;
        self.merge(index, snapshot);

        let next = index + 1;
        if let Some(stdin) = self.resident_stage(next).and_then(|h| h.backend.shared_stdin()) {
            stdin.close();
        }
        if let Some(pos) = self.resident_position(index) {
            self.resident.remove(pos);
        }
        tracing::debug!(stage = index, "stage ended");

        if next == self.stage_count() {
            for handle in self.resident.iter_mut() {
                tracing::debug!(stage = handle.index, "terminating upstream stage after last stage ended");
                handle.backend.terminate();
            }
            self.resident.clear();
            self.stages.clear();
            self.running = false;
            self.outcome = Some(PipelineOutcome::Completed);
            self.complete();
            return;
        }

        self.spawn_window(next).await;

        let refill = self.next_spawn;
        if self.running
            && refill > 0
            && !self.finished[refill - 1]
            && self.resident_position(refill - 1).is_some()
            && self.can_spawn_ahead(refill)
        {
            self.spawn_window(refill).await;
        }
    }

    /// Stage 0 is blocked on an empty channel. The read itself is driven by
    /// the run loop so events keep flowing while the reader is idle.
    fn on_stdin_request(&mut self, index: usize) {
        if index != 0 {
            return;
        }
        let Some(stdin) = self.resident_stage(0).and_then(|h| h.backend.shared_stdin()) else {
            return;
        };
        if self.ctx.stdin_reader.is_none() {
            stdin.close();
            return;
        }
        self.stdin_wanted = true;
    }

    fn on_stdin_line(&mut self, line: Option<String>) {
        let Some(stdin) = self.resident_stage(0).and_then(|h| h.backend.shared_stdin()) else {
            tracing::trace!("first stage gone, dropping interactive input");
            return;
        };
        match line {
            Some(line) => {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                if let Err(e) = stdin.write(&bytes) {
                    tracing::debug!(stage = 0, error = %e, "interactive input rejected");
                }
            }
            None => stdin.close(),
        }
    }

    fn fail_stage(&mut self, command: &str, error: PipelineError, snapshot: Option<FsSnapshot>) {
        if !self.running {
            return;
        }
        tracing::error!(error.kind = error.kind(), error.message = %error, command = %command, "stage failed");
        if let Some(sink) = &self.ctx.sink {
            let message = match &error {
                PipelineError::Runtime { message, .. } => message.clone(),
                other => other.to_string(),
            };
            sink.print(&format!("{command}: {message}\n"));
        }
        if self.ctx.merge_on_error {
            self.merge_snapshot(command, snapshot);
        } else if snapshot.is_some() {
            tracing::debug!(command = %command, "discarding snapshot of failed stage");
        }
        self.outcome = Some(PipelineOutcome::Failed(error));
        self.kill();
    }

    fn merge(&mut self, index: usize, snapshot: Option<FsSnapshot>) {
        let command = self
            .resident_stage(index)
            .map(|h| h.command.clone())
            .unwrap_or_default();
        self.merge_snapshot(&command, snapshot);
    }

    fn merge_snapshot(&mut self, command: &str, snapshot: Option<FsSnapshot>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        match self.ctx.fs.import_snapshot(snapshot) {
            Ok(()) => {
                self.stats.fs_merges += 1;
                tracing::debug!(command = %command, "filesystem snapshot merged");
            }
            Err(e) => {
                let err = PipelineError::Filesystem(format!("{e:#}"));
                tracing::warn!(error.kind = err.kind(), error.message = %err, command = %command, "filesystem merge failed");
            }
        }
    }
}
