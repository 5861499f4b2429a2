use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Failures a pipeline run can end with.
///
/// `Parse` and `Resolution` are raised before any stage is spawned;
/// `BackendConfig` and `Runtime` end a pipeline that is already running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Parse(String),
    #[error("{command}: {message}")]
    Resolution { command: String, message: String },
    #[error("backend config error: {0}")]
    BackendConfig(String),
    #[error("{command}: {message}")]
    Runtime { command: String, message: String },
    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl PipelineError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn resolution(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Resolution {
            command: command.into(),
            message: err.to_string(),
        }
    }

    pub fn runtime(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            command: command.into(),
            message: message.into(),
        }
    }

    /// True for failures that happen before the first stage is spawned.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Resolution { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "pipeline.parse",
            Self::Resolution { .. } => "pipeline.resolution",
            Self::BackendConfig(_) => "pipeline.backend_config",
            Self::Runtime { .. } => "pipeline.runtime",
            Self::Filesystem(_) => "pipeline.filesystem",
        }
    }
}
