use std::sync::Arc;

use conduit_core::ast::CommandParser;
use conduit_core::backend::{BackendFactory, ThreadContextSource};
use conduit_core::config::AppConfig;
use conduit_core::pipeline::RunnerContext;
use conduit_core::resolver::{CommandFetcher, ModuleCompiler};

use crate::fetcher::ConfigFetcher;
use crate::fs::MemoryFs;
use crate::modules::ScriptCompiler;
use crate::parser::LineParser;

pub fn build_parser() -> Arc<dyn CommandParser> {
    Arc::new(LineParser)
}

pub fn build_compiler() -> Arc<dyn ModuleCompiler> {
    Arc::new(ScriptCompiler)
}

pub fn build_fetcher(cfg: &AppConfig, compiler: Arc<dyn ModuleCompiler>) -> Arc<dyn CommandFetcher> {
    Arc::new(ConfigFetcher::from_config(&cfg.commands, compiler))
}

pub fn build_filesystem() -> Arc<MemoryFs> {
    Arc::new(MemoryFs::new())
}

pub fn build_backends(cfg: &AppConfig) -> Arc<BackendFactory> {
    if !cfg.pipeline.streaming {
        return Arc::new(BackendFactory::in_process_only());
    }
    let source = Arc::new(ThreadContextSource::new(cfg.pipeline.worker_stack_bytes));
    Arc::new(
        BackendFactory::new(Some(source), true).with_stdin_capacity(cfg.pipeline.stdin_buffer_bytes),
    )
}

/// Wires the reference collaborators into a runner context. Sink and stdin
/// reader are left to the caller.
pub fn build_runner_context(cfg: &AppConfig, fs: Arc<MemoryFs>) -> RunnerContext {
    let compiler = build_compiler();
    RunnerContext::new(
        build_parser(),
        build_fetcher(cfg, compiler.clone()),
        fs,
        build_backends(cfg),
    )
    .with_compiler(compiler)
    .with_merge_on_error(cfg.pipeline.merge_on_error)
}
