use std::path::PathBuf;
use std::sync::Arc;

use conduit_core::config::AppConfig;
use conduit_core::pipeline::{CommandRunner, PipelineOutcome, PipelineReport, RunnerContext};
use conduit_core::terminal::{OutputSink, StdinReader};
use conduit_plugins::factory::build_runner_context;
use conduit_plugins::fs::MemoryFs;

use crate::commands::cli::Args;

/// Folds command-line flags into the loaded config.
pub fn apply_args(cfg: &mut AppConfig, args: &Args) {
    if args.no_streaming {
        cfg.pipeline.streaming = false;
    }
    if let Some(dir) = &args.modules_dir {
        cfg.commands.modules_dir = Some(dir.clone());
    }
    if cfg.commands.modules_dir.is_none() {
        cfg.commands.modules_dir = default_modules_dir().map(|p| p.display().to_string());
    }
}

fn default_modules_dir() -> Option<PathBuf> {
    let dir = dirs::home_dir()?.join(".conduit").join("commands");
    dir.is_dir().then_some(dir)
}

pub fn exit_code(outcome: &PipelineOutcome) -> i32 {
    match outcome {
        PipelineOutcome::Completed => 0,
        PipelineOutcome::Failed(_) => 1,
        PipelineOutcome::Killed => 130,
    }
}

/// Runs command lines against one filesystem and one runner context, so the
/// worker image is prepared at most once per process.
pub struct Shell {
    ctx: RunnerContext,
    fs: Arc<MemoryFs>,
    sink: Arc<dyn OutputSink>,
    input: Arc<dyn StdinReader>,
    prompt: Option<String>,
}

impl Shell {
    pub fn new(cfg: &AppConfig, sink: Arc<dyn OutputSink>, input: Arc<dyn StdinReader>) -> Self {
        let fs = Arc::new(MemoryFs::new());
        let ctx = build_runner_context(cfg, fs.clone())
            .with_sink(sink.clone())
            .with_stdin_reader(input.clone());
        Self {
            ctx,
            fs,
            sink,
            input,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn filesystem(&self) -> &Arc<MemoryFs> {
        &self.fs
    }

    /// Runs one line to completion. Ctrl-C while it runs kills the pipeline.
    pub async fn run_line(&self, line: &str) -> PipelineReport {
        let mut runner = CommandRunner::new(self.ctx.clone(), line);
        let switch = runner.kill_switch();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, killing pipeline");
                switch.kill();
            }
        });

        let report = runner.run_command().await;
        interrupt.abort();

        tracing::debug!(
            run_id = %report.run_id,
            outcome = ?report.outcome,
            stages = report.stages_total,
            max_resident = report.max_resident,
            duration_ms = report.duration_ms,
            "command finished"
        );
        report
    }

    /// Reads and runs lines until end of input or `exit`. Returns the exit
    /// code of the last command.
    pub async fn run_interactive(&self) -> i32 {
        let mut last = 0;
        loop {
            if let Some(prompt) = &self.prompt {
                self.sink.print(prompt);
            }
            let Some(line) = self.input.read_line().await else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                break;
            }
            last = exit_code(&self.run_line(line).await.outcome);
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::LineInput;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<String>);

    impl OutputSink for Capture {
        fn print(&self, text: &str) {
            self.0.lock().unwrap().push_str(text);
        }
    }

    fn shell(script: &'static str) -> (Shell, Arc<Capture>) {
        let mut cfg = AppConfig::default();
        cfg.pipeline.streaming = false;
        let sink = Arc::new(Capture::default());
        let input = Arc::new(LineInput::new(script.as_bytes()));
        (Shell::new(&cfg, sink.clone(), input), sink)
    }

    #[tokio::test]
    async fn interactive_loop_shares_filesystem_between_lines() {
        let (shell, sink) = shell("echo one | tee a\n\ncat a | wc -l\nexit\necho unreached\n");
        let code = shell.run_interactive().await;
        assert_eq!(code, 0);
        assert_eq!(sink.0.lock().unwrap().as_str(), "one\n1\n");
        assert_eq!(shell.filesystem().read("a").as_deref(), Some("one\n"));
    }

    #[tokio::test]
    async fn failed_command_sets_exit_code() {
        let (shell, _) = shell("false\n");
        assert_eq!(shell.run_interactive().await, 1);
    }

    #[test]
    fn flags_override_config() {
        let mut cfg = AppConfig::default();
        let args = Args {
            no_streaming: true,
            modules_dir: Some("/tmp/mods".into()),
            ..Args::default()
        };
        apply_args(&mut cfg, &args);
        assert!(!cfg.pipeline.streaming);
        assert_eq!(cfg.commands.modules_dir.as_deref(), Some("/tmp/mods"));
    }

    #[test]
    fn outcomes_map_to_exit_codes() {
        assert_eq!(exit_code(&PipelineOutcome::Completed), 0);
        assert_eq!(exit_code(&PipelineOutcome::Killed), 130);
    }
}
