use std::collections::BTreeMap;

use crate::ast::{CommandNode, Node};
use crate::error::PipelineError;
use crate::terminal::OutputSink;

use super::types::{
    CommandFetcher, CompiledModule, Executable, FetchRequest, ModuleCompiler, Resolution,
    StageDescriptor,
};

/// Collaborators the resolver consults for each stage.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub fetcher: &'a dyn CommandFetcher,
    pub compiler: Option<&'a dyn ModuleCompiler>,
    pub sink: Option<&'a dyn OutputSink>,
}

/// Resolves a parsed command line into stage descriptors, earliest stage
/// first.
///
/// Piped sub-commands are resolved before the command that feeds them, so
/// for `a | b` the fetcher sees `b` first, but the result is `[a, b]`.
pub async fn resolve_stages(
    nodes: &[Node],
    ctx: &ResolveContext<'_>,
) -> Result<Vec<StageDescriptor>, PipelineError> {
    let root = match nodes {
        [] => return Err(PipelineError::parse("No command given")),
        [Node::Command(cmd)] => cmd,
        [Node::Unsupported { kind }] => {
            return Err(PipelineError::parse(format!(
                "Only commands allowed (got {kind})"
            )))
        }
        _ => return Err(PipelineError::parse("Only one command permitted")),
    };

    let mut chain: Vec<&CommandNode> = vec![root];
    while let Some(next) = chain[chain.len() - 1].piped() {
        chain.push(next);
    }

    let mut stages = Vec::with_capacity(chain.len());
    for node in chain.iter().rev() {
        stages.push(resolve_node(node, ctx).await?);
    }
    stages.reverse();

    tracing::debug!(
        stages = stages.len(),
        commands = ?stages.iter().map(StageDescriptor::command).collect::<Vec<_>>(),
        "pipeline resolved"
    );
    Ok(stages)
}

async fn resolve_node(
    node: &CommandNode,
    ctx: &ResolveContext<'_>,
) -> Result<StageDescriptor, PipelineError> {
    let name = node.command.value.clone();
    let mut argv = Vec::with_capacity(node.args.len() + 1);
    argv.push(name.clone());
    argv.extend(node.args.iter().map(|a| a.value.clone()));

    let mut env: BTreeMap<String, String> = node
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.value.clone()))
        .collect();
    if let Some(size) = ctx.sink.and_then(|s| s.term_size()) {
        env.insert("LINES".to_string(), size.rows.to_string());
        env.insert("COLUMNS".to_string(), size.cols.to_string());
    }

    let request = FetchRequest { args: argv, env };

    if let Some(sink) = ctx.sink {
        sink.print_status(&format!("[INFO] Fetching the command {name} ..."));
    }
    let fetched = ctx.fetcher.fetch_command(&request).await;
    if let Some(sink) = ctx.sink {
        sink.clear_status();
    }

    let FetchRequest { args, env } = request;
    match fetched.map_err(|e| PipelineError::resolution(&name, e))? {
        Resolution::Module(bytes) => {
            let compiler = ctx.compiler.ok_or_else(|| {
                PipelineError::resolution(&name, "no module compiler configured")
            })?;
            let program = compiler
                .compile(&name, &bytes)
                .map_err(|e| PipelineError::resolution(&name, e))?;
            let module = CompiledModule::new(program, bytes.len());
            Ok(StageDescriptor::new(args, env, Executable::Module(module)))
        }
        Resolution::Callback(callback) => {
            Ok(StageDescriptor::new(args, env, Executable::Callback(callback)))
        }
        Resolution::Stage(descriptor) => Ok(descriptor),
    }
}
