use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "conduit", version, about = "Run shell-style command pipelines")]
pub struct Args {
    /// Run a single command line and exit instead of reading commands
    /// interactively.
    #[arg(short = 'c', long = "command")]
    pub command: Option<String>,

    /// Run every stage in-process, one after another.
    #[arg(long)]
    pub no_streaming: bool,

    /// Config file to load instead of the default search path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding `<name>.cds` filter scripts.
    #[arg(long)]
    pub modules_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_shot_flags() {
        let args = Args::parse_from(["conduit", "-c", "echo hi | wc", "--no-streaming"]);
        assert_eq!(args.command.as_deref(), Some("echo hi | wc"));
        assert!(args.no_streaming);
        assert!(args.config.is_none());
    }
}
