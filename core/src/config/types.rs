use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "conduit_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whether stages may run on their own execution context and stream into
    /// each other. When false every stage runs in-process, one after another.
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Capacity of the shared stdin ring buffer handed to concurrent stages.
    #[serde(default = "default_stdin_buffer_bytes")]
    pub stdin_buffer_bytes: usize,

    /// Import the snapshot a failing stage hands back. When false the
    /// filesystem keeps the state of the last successful merge.
    #[serde(default = "default_merge_on_error")]
    pub merge_on_error: bool,

    #[serde(default = "default_worker_stack_bytes")]
    pub worker_stack_bytes: usize,
}

fn default_streaming() -> bool {
    true
}

fn default_stdin_buffer_bytes() -> usize {
    8 * 1024
}

fn default_merge_on_error() -> bool {
    true
}

fn default_worker_stack_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            streaming: default_streaming(),
            stdin_buffer_bytes: default_stdin_buffer_bytes(),
            merge_on_error: default_merge_on_error(),
            worker_stack_bytes: default_worker_stack_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Directory holding `<name>.cds` filter-script modules.
    #[serde(default)]
    pub modules_dir: Option<String>,

    /// `name = "command line"` aliases resolved to pre-built stages.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}
