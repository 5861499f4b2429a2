use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::config::CommandsConfig;
use conduit_core::resolver::{
    CommandFetcher, CompiledModule, Executable, FetchRequest, ModuleCompiler, Resolution,
    StageDescriptor,
};

use crate::commands::builtin;
use crate::modules::SCRIPT_EXTENSION;

/// Resolves commands from configuration, in order: aliases, filter scripts
/// in the modules directory, then built-ins.
pub struct ConfigFetcher {
    modules_dir: Option<PathBuf>,
    aliases: BTreeMap<String, String>,
    compiler: Arc<dyn ModuleCompiler>,
}

impl ConfigFetcher {
    pub fn new(compiler: Arc<dyn ModuleCompiler>) -> Self {
        Self {
            modules_dir: None,
            aliases: BTreeMap::new(),
            compiler,
        }
    }

    pub fn from_config(cfg: &CommandsConfig, compiler: Arc<dyn ModuleCompiler>) -> Self {
        let mut fetcher = Self::new(compiler);
        fetcher.modules_dir = cfg.modules_dir.as_ref().map(PathBuf::from);
        fetcher.aliases = cfg.aliases.clone();
        fetcher
    }

    pub fn with_modules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.modules_dir = Some(dir.into());
        self
    }

    pub fn with_alias(mut self, name: impl Into<String>, line: impl Into<String>) -> Self {
        self.aliases.insert(name.into(), line.into());
        self
    }

    async fn load_module(&self, name: &str) -> Result<Option<Bytes>> {
        let Some(dir) = &self.modules_dir else {
            return Ok(None);
        };
        if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\') || name.starts_with('.') {
            return Ok(None);
        }
        let path = dir.join(format!("{name}.{SCRIPT_EXTENSION}"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(command = %name, path = %path.display(), bytes = bytes.len(), "module loaded");
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Resolves an alias target. Aliases do not chain.
    async fn resolve_target(&self, name: &str) -> Result<Option<Executable>> {
        if let Some(bytes) = self.load_module(name).await? {
            let program = self.compiler.compile(name, &bytes)?;
            return Ok(Some(Executable::Module(CompiledModule::new(
                program,
                bytes.len(),
            ))));
        }
        Ok(builtin(name).map(Executable::Callback))
    }
}

#[async_trait]
impl CommandFetcher for ConfigFetcher {
    async fn fetch_command(&self, request: &FetchRequest) -> Result<Resolution> {
        let Some(name) = request.args.first() else {
            anyhow::bail!("empty command");
        };

        if let Some(line) = self.aliases.get(name) {
            let mut argv = shlex::split(line)
                .with_context(|| format!("alias `{name}`: unbalanced quotes"))?;
            let Some(target) = argv.first().cloned() else {
                anyhow::bail!("alias `{name}` is empty");
            };
            let executable = self
                .resolve_target(&target)
                .await?
                .with_context(|| format!("alias target `{target}` not found"))?;
            argv.extend(request.args[1..].iter().cloned());
            tracing::debug!(alias = %name, argv = ?argv, "alias expanded");
            return Ok(Resolution::Stage(StageDescriptor::new(
                argv,
                request.env.clone(),
                executable,
            )));
        }

        if let Some(bytes) = self.load_module(name).await? {
            return Ok(Resolution::Module(bytes));
        }
        if let Some(callback) = builtin(name) {
            return Ok(Resolution::Callback(callback));
        }
        anyhow::bail!("command not found")
    }
}
