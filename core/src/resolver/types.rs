use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::StageIo;
use crate::fs::FsSnapshot;

/// One resolved pipeline stage. Immutable once produced.
#[derive(Clone)]
pub struct StageDescriptor {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub executable: Executable,
}

impl StageDescriptor {
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>, executable: Executable) -> Self {
        Self {
            argv,
            env,
            executable,
        }
    }

    /// `argv[0]`, used to tag diagnostics.
    pub fn command(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.executable, Executable::Callback(_))
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("argv", &self.argv)
            .field("env", &self.env)
            .field("executable", &self.executable)
            .finish()
    }
}

#[derive(Clone)]
pub enum Executable {
    /// A compiled, streaming-capable unit.
    Module(CompiledModule),
    /// A native function receiving the whole stdin as one value.
    Callback(Arc<dyn CommandCallback>),
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executable::Module(m) => write!(f, "Module({} bytes)", m.size_bytes),
            Executable::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Clone)]
pub struct CompiledModule {
    program: Arc<dyn ModuleProgram>,
    size_bytes: usize,
}

impl CompiledModule {
    pub fn new(program: Arc<dyn ModuleProgram>, size_bytes: usize) -> Self {
        Self {
            program,
            size_bytes,
        }
    }

    pub fn program(&self) -> &Arc<dyn ModuleProgram> {
        &self.program
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Executes a compiled unit against its stage I/O. Runs on whichever
/// execution context the backend picked, so it must not assume the control
/// task is free.
pub trait ModuleProgram: Send + Sync {
    fn run(&self, io: &mut dyn StageIo) -> anyhow::Result<()>;
}

/// Turns a fetched byte blob into a runnable program.
pub trait ModuleCompiler: Send + Sync {
    fn compile(&self, name: &str, bytes: &[u8]) -> anyhow::Result<Arc<dyn ModuleProgram>>;
}

pub struct CallbackInput<'a> {
    pub args: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub stdin: String,
    pub fs: &'a mut FsSnapshot,
}

/// A native command. Its `Some` result is written to stdout followed by a
/// newline.
#[async_trait]
pub trait CommandCallback: Send + Sync {
    async fn call(&self, input: CallbackInput<'_>) -> anyhow::Result<Option<String>>;
}

struct FnCallback<F>(F);

#[async_trait]
impl<F> CommandCallback for FnCallback<F>
where
    F: Fn(&[String], &str) -> anyhow::Result<Option<String>> + Send + Sync,
{
    async fn call(&self, input: CallbackInput<'_>) -> anyhow::Result<Option<String>> {
        (self.0)(input.args, &input.stdin)
    }
}

/// Wraps a plain `(argv, stdin) -> output` closure as a callback command.
pub fn callback_fn<F>(f: F) -> Arc<dyn CommandCallback>
where
    F: Fn(&[String], &str) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
{
    Arc::new(FnCallback(f))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// What a `CommandFetcher` hands back for one command.
pub enum Resolution {
    /// Raw module bytes, compiled by the configured `ModuleCompiler`.
    Module(Bytes),
    Callback(Arc<dyn CommandCallback>),
    /// A descriptor resolved ahead of time, used verbatim.
    Stage(StageDescriptor),
}

#[async_trait]
pub trait CommandFetcher: Send + Sync {
    async fn fetch_command(&self, request: &FetchRequest) -> anyhow::Result<Resolution>;
}
