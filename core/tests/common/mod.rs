#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::ast::{CommandNode, CommandParser, Node};
use conduit_core::backend::{
    BackendFactory, ContextSource, LineReader, StageIo, ThreadContextSource, WorkerImage,
};
use conduit_core::fs::{Filesystem, FsSnapshot};
use conduit_core::pipeline::{CommandRunner, PipelineReport, RunnerContext};
use conduit_core::resolver::{
    callback_fn, CommandCallback, CommandFetcher, CompiledModule, Executable, FetchRequest,
    ModuleProgram, Resolution, StageDescriptor,
};
use conduit_core::terminal::{OutputSink, StdinReader, TermSize};

/// `a | b c` → one node chain; `;` separates top-level nodes; a leading `(`
/// makes an unsupported node.
pub struct SimpleParser;

impl CommandParser for SimpleParser {
    fn parse(&self, line: &str) -> anyhow::Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for part in line.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            if part.starts_with('(') {
                nodes.push(Node::Unsupported {
                    kind: "subshell".into(),
                });
                continue;
            }
            let mut chain: Option<CommandNode> = None;
            for segment in part.split('|') {
                let words: Vec<&str> = segment.split_whitespace().collect();
                let Some((name, args)) = words.split_first() else {
                    anyhow::bail!("empty pipeline segment");
                };
                let node = CommandNode::new(name, args);
                chain = Some(match chain {
                    Some(head) => head.pipe_into(node),
                    None => node,
                });
            }
            if let Some(chain) = chain {
                nodes.push(Node::Command(chain));
            }
        }
        Ok(nodes)
    }
}

#[derive(Clone)]
pub enum Entry {
    Module(Arc<dyn ModuleProgram>),
    Callback(Arc<dyn CommandCallback>),
}

#[derive(Default)]
pub struct MapFetcher {
    entries: HashMap<String, Entry>,
    pub fetched: Mutex<Vec<String>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &str, program: impl ModuleProgram + 'static) -> Self {
        self.entries
            .insert(name.to_string(), Entry::Module(Arc::new(program)));
        self
    }

    pub fn callback(mut self, name: &str, callback: Arc<dyn CommandCallback>) -> Self {
        self.entries
            .insert(name.to_string(), Entry::Callback(callback));
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandFetcher for MapFetcher {
    async fn fetch_command(&self, request: &FetchRequest) -> anyhow::Result<Resolution> {
        let name = request.args[0].clone();
        self.fetched.lock().unwrap().push(name.clone());
        match self.entries.get(&name) {
            Some(Entry::Module(program)) => Ok(Resolution::Stage(StageDescriptor::new(
                request.args.clone(),
                request.env.clone(),
                Executable::Module(CompiledModule::new(program.clone(), 0)),
            ))),
            Some(Entry::Callback(callback)) => Ok(Resolution::Callback(callback.clone())),
            None => anyhow::bail!("command not found"),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    out: Mutex<String>,
    statuses: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn output(&self) -> String {
        self.out.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn print(&self, text: &str) {
        self.out.lock().unwrap().push_str(text);
    }

    fn print_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }

    fn term_size(&self) -> Option<TermSize> {
        Some(TermSize { rows: 24, cols: 80 })
    }
}

/// Flat `{path: content}` filesystem.
pub struct MemFs {
    state: Mutex<FsSnapshot>,
    pub imports: AtomicUsize,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FsSnapshot::new(serde_json::json!({}))),
            imports: AtomicUsize::new(0),
        }
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .as_value()
            .get(path)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl Filesystem for MemFs {
    fn export_snapshot(&self) -> FsSnapshot {
        self.state.lock().unwrap().clone()
    }

    fn import_snapshot(&self, snapshot: FsSnapshot) -> anyhow::Result<()> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = snapshot;
        Ok(())
    }
}

pub struct CountingSource {
    inner: ThreadContextSource,
    pub fetches: AtomicUsize,
}

impl CountingSource {
    pub fn new() -> Self {
        Self {
            inner: ThreadContextSource::new(256 * 1024),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContextSource for CountingSource {
    fn describe(&self) -> String {
        "counting thread source".into()
    }

    async fn fetch(&self) -> anyhow::Result<Arc<dyn WorkerImage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch().await
    }
}

pub struct LinesReader {
    lines: Mutex<VecDeque<String>>,
    idle_when_empty: bool,
}

impl LinesReader {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
            idle_when_empty: false,
        }
    }

    /// Hands out `lines`, then waits forever like a user who stopped typing.
    pub fn then_idle(lines: &[&str]) -> Self {
        Self {
            idle_when_empty: true,
            ..Self::new(lines)
        }
    }
}

#[async_trait]
impl StdinReader for LinesReader {
    async fn read_line(&self) -> Option<String> {
        let next = self.lines.lock().unwrap().pop_front();
        match next {
            None if self.idle_when_empty => std::future::pending().await,
            next => next,
        }
    }
}

/// Never produces a line.
pub struct IdleReader;

#[async_trait]
impl StdinReader for IdleReader {
    async fn read_line(&self) -> Option<String> {
        std::future::pending().await
    }
}

/// Tracks how many programs are running at once.
#[derive(Default)]
pub struct Liveness {
    live: AtomicUsize,
    peak: AtomicUsize,
    exits: AtomicUsize,
}

impl Liveness {
    pub fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.exits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    pub async fn wait_for_exits(&self, n: usize) -> bool {
        for _ in 0..200 {
            if self.exits() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

struct Tracked<'a>(&'a Option<Arc<Liveness>>);

impl<'a> Tracked<'a> {
    fn new(live: &'a Option<Arc<Liveness>>) -> Self {
        if let Some(l) = live {
            l.enter();
        }
        Self(live)
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        if let Some(l) = self.0 {
            l.leave();
        }
    }
}

/// Writes `count` numbered lines: `line 0`, `line 1`, ...
pub struct Produce {
    pub count: usize,
    pub live: Option<Arc<Liveness>>,
}

impl ModuleProgram for Produce {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let _t = Tracked::new(&self.live);
        for i in 0..self.count {
            io.write_stdout(format!("line {i}\n").as_bytes())?;
        }
        Ok(())
    }
}

/// Uppercases stdin line by line.
#[derive(Default)]
pub struct Upper {
    pub live: Option<Arc<Liveness>>,
}

impl ModuleProgram for Upper {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let _t = Tracked::new(&self.live);
        let mut lines = LineReader::new();
        while let Some(line) = lines.next_line(io)? {
            io.write_stdout(format!("{}\n", line.to_uppercase()).as_bytes())?;
        }
        Ok(())
    }
}

/// Copies the first line of stdin and stops reading.
pub struct Head;

impl ModuleProgram for Head {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let mut lines = LineReader::new();
        if let Some(line) = lines.next_line(io)? {
            io.write_stdout(format!("{line}\n").as_bytes())?;
        }
        Ok(())
    }
}

/// Writes a line every few milliseconds until its output is cut.
pub struct Ticker {
    pub live: Option<Arc<Liveness>>,
}

impl ModuleProgram for Ticker {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let _t = Tracked::new(&self.live);
        loop {
            io.write_stdout(b"tick\n")?;
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Writes `path` into the filesystem, then optionally fails.
pub struct WriteFile {
    pub path: &'static str,
    pub content: &'static str,
    pub fail_with: Option<&'static str>,
}

impl ModuleProgram for WriteFile {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let fs = io.fs().as_value_mut();
        if !fs.is_object() {
            *fs = serde_json::json!({});
        }
        fs[self.path] = serde_json::Value::String(self.content.to_string());
        io.write_stdout(b"wrote\n")?;
        match self.fail_with {
            Some(msg) => anyhow::bail!("{msg}"),
            None => Ok(()),
        }
    }
}

/// Prints the content of `path` from its snapshot.
pub struct ReadFile {
    pub path: &'static str,
}

impl ModuleProgram for ReadFile {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()> {
        let content = io
            .fs()
            .as_value()
            .get(self.path)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match content {
            Some(text) => io.write_stdout(format!("{text}\n").as_bytes())?,
            None => anyhow::bail!("{}: no such file", self.path),
        }
        Ok(())
    }
}

pub fn echo() -> Arc<dyn CommandCallback> {
    callback_fn(|args, _stdin| Ok(Some(args[1..].join(" "))))
}

/// Counts stdin lines.
pub fn count_lines() -> Arc<dyn CommandCallback> {
    callback_fn(|_args, stdin| Ok(Some(stdin.lines().count().to_string())))
}

pub struct Harness {
    pub fetcher: Arc<MapFetcher>,
    pub sink: Arc<RecordingSink>,
    pub fs: Arc<MemFs>,
    pub source: Arc<CountingSource>,
    pub backends: Arc<BackendFactory>,
    pub completions: Arc<AtomicUsize>,
    pub reader: Option<Arc<dyn StdinReader>>,
    pub merge_on_error: bool,
}

impl Harness {
    pub fn streaming(fetcher: MapFetcher) -> Self {
        let source = Arc::new(CountingSource::new());
        let backends = Arc::new(BackendFactory::new(Some(source.clone()), true));
        Self::with_backends(fetcher, source, backends)
    }

    pub fn sequential(fetcher: MapFetcher) -> Self {
        let source = Arc::new(CountingSource::new());
        let backends = Arc::new(BackendFactory::in_process_only());
        Self::with_backends(fetcher, source, backends)
    }

    pub fn with_backends(
        fetcher: MapFetcher,
        source: Arc<CountingSource>,
        backends: Arc<BackendFactory>,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            sink: Arc::new(RecordingSink::default()),
            fs: Arc::new(MemFs::new()),
            source,
            backends,
            completions: Arc::new(AtomicUsize::new(0)),
            reader: None,
            merge_on_error: true,
        }
    }

    pub fn context(&self) -> RunnerContext {
        let mut ctx = RunnerContext::new(
            Arc::new(SimpleParser),
            self.fetcher.clone(),
            self.fs.clone(),
            self.backends.clone(),
        )
        .with_sink(self.sink.clone())
        .with_merge_on_error(self.merge_on_error);
        if let Some(reader) = &self.reader {
            ctx = ctx.with_stdin_reader(reader.clone());
        }
        ctx
    }

    pub fn runner(&self, command: &str) -> CommandRunner {
        let completions = self.completions.clone();
        CommandRunner::new(self.context(), command).on_complete(move |_report| {
            completions.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub async fn run(&self, command: &str) -> PipelineReport {
        let mut runner = self.runner(command);
        tokio::time::timeout(Duration::from_secs(10), runner.run_command())
            .await
            .expect("pipeline did not finish in time")
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

pub fn env_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
