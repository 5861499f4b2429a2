//! Filter scripts: a tiny line-oriented module format.
//!
//! One instruction per line, `#` starts a comment. Actions run once, in
//! order; consecutive filter instructions form a chain that streams stdin
//! line by line, so a script can sit in the middle of a pipeline and
//! produce output while its producer is still running.
//!
//! ```text
//! emit Searching for $1       # action: write a line ($1, $@, ${VAR})
//! grep -i $1                  # filter chain starts here
//! map upper
//! number
//! emit done                   # action again, after end of input
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use conduit_core::backend::{LineReader, StageIo};
use conduit_core::resolver::{ModuleCompiler, ModuleProgram};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

use crate::fs::{read_file, write_file};

pub const SCRIPT_EXTENSION: &str = "cds";

lazy_static! {
    static ref VARIABLE: Regex =
        Regex::new(r"\$(\{[A-Za-z_][A-Za-z0-9_]*\}|[0-9@$])").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Upper,
    Lower,
    Trim,
    Reverse,
}

impl Transform {
    fn apply(self, line: &str) -> String {
        match self {
            Transform::Upper => line.to_uppercase(),
            Transform::Lower => line.to_lowercase(),
            Transform::Trim => line.trim().to_string(),
            Transform::Reverse => line.chars().rev().collect(),
        }
    }
}

/// Pattern text is kept unexpanded; `$1` and friends are filled in per run.
#[derive(Debug, Clone)]
enum LineOp {
    Map(Transform),
    Grep {
        pattern: String,
        invert: bool,
        ignore_case: bool,
    },
    Head(usize),
    Number,
    Prefix(String),
    Tee(String),
}

#[derive(Debug, Clone)]
enum Action {
    Emit(String),
    Read(String),
    Write { path: String, text: String },
    Fail(String),
}

#[derive(Debug, Clone)]
enum Step {
    Action(Action),
    Filter { ops: Vec<LineOp>, count: bool },
}

pub struct ScriptProgram {
    name: String,
    steps: Vec<Step>,
}

impl ScriptProgram {
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let mut steps = Vec::new();
        let mut chain: Vec<LineOp> = Vec::new();

        for (lineno, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (op, rest) = line
                .split_once(char::is_whitespace)
                .map(|(op, rest)| (op, rest.trim()))
                .unwrap_or((line, ""));
            let at = || format!("{name}: line {}", lineno + 1);

            let filter = match op {
                "map" => Some(LineOp::Map(match rest {
                    "upper" => Transform::Upper,
                    "lower" => Transform::Lower,
                    "trim" => Transform::Trim,
                    "reverse" => Transform::Reverse,
                    other => anyhow::bail!("{}: unknown transform `{other}`", at()),
                })),
                "grep" => Some(parse_grep(rest).with_context(at)?),
                "head" => Some(LineOp::Head(
                    rest.parse()
                        .with_context(|| format!("{}: head needs a line count", at()))?,
                )),
                "number" => Some(LineOp::Number),
                "prefix" => Some(LineOp::Prefix(rest.to_string())),
                "tee" if !rest.is_empty() => Some(LineOp::Tee(rest.to_string())),
                "cat" => None,
                "count" => {
                    steps.push(Step::Filter {
                        ops: std::mem::take(&mut chain),
                        count: true,
                    });
                    continue;
                }
                _ => {
                    let action = match op {
                        "emit" => Action::Emit(rest.to_string()),
                        "read" if !rest.is_empty() => Action::Read(rest.to_string()),
                        "write" => {
                            let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                            if path.is_empty() {
                                anyhow::bail!("{}: write needs a path", at());
                            }
                            Action::Write {
                                path: path.to_string(),
                                text: text.trim_start().to_string(),
                            }
                        }
                        "fail" => Action::Fail(rest.to_string()),
                        other => anyhow::bail!("{}: unknown instruction `{other}`", at()),
                    };
                    if !chain.is_empty() {
                        steps.push(Step::Filter {
                            ops: std::mem::take(&mut chain),
                            count: false,
                        });
                    }
                    steps.push(Step::Action(action));
                    continue;
                }
            };
            // `cat` alone is an empty chain that still copies stdin.
            match filter {
                Some(op) => chain.push(op),
                None if chain.is_empty() => steps.push(Step::Filter {
                    ops: Vec::new(),
                    count: false,
                }),
                None => {}
            }
        }
        if !chain.is_empty() {
            steps.push(Step::Filter {
                ops: chain,
                count: false,
            });
        }

        Ok(Self {
            name: name.to_string(),
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the script reads stdin at all.
    pub fn reads_stdin(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Filter { .. }))
    }
}

fn parse_grep(rest: &str) -> Result<LineOp> {
    let mut invert = false;
    let mut ignore_case = false;
    let mut pattern = rest;
    loop {
        if let Some(tail) = pattern.strip_prefix("-v ") {
            invert = true;
            pattern = tail.trim_start();
        } else if let Some(tail) = pattern.strip_prefix("-i ") {
            ignore_case = true;
            pattern = tail.trim_start();
        } else {
            break;
        }
    }
    if pattern.is_empty() {
        anyhow::bail!("grep needs a pattern");
    }
    Ok(LineOp::Grep {
        pattern: pattern.to_string(),
        invert,
        ignore_case,
    })
}

fn expand(text: &str, io: &dyn StageIo) -> String {
    VARIABLE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            match var {
                "$" => "$".to_string(),
                "@" => io.args().get(1..).unwrap_or_default().join(" "),
                _ if var.starts_with('{') => io
                    .env()
                    .get(&var[1..var.len() - 1])
                    .cloned()
                    .unwrap_or_default(),
                digit => digit
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| io.args().get(i).cloned())
                    .unwrap_or_default(),
            }
        })
        .into_owned()
}

enum ReadyOp {
    Map(Transform),
    Grep { regex: Regex, invert: bool },
    Head(usize),
    Number,
    Prefix(String),
    Tee(String),
}

fn prepare(ops: &[LineOp], io: &dyn StageIo) -> Result<Vec<ReadyOp>> {
    ops.iter()
        .map(|op| {
            Ok(match op {
                LineOp::Map(t) => ReadyOp::Map(*t),
                LineOp::Grep {
                    pattern,
                    invert,
                    ignore_case,
                } => {
                    let pattern = expand(pattern, io);
                    let regex = RegexBuilder::new(&pattern)
                        .case_insensitive(*ignore_case)
                        .build()
                        .with_context(|| format!("invalid pattern `{pattern}`"))?;
                    ReadyOp::Grep {
                        regex,
                        invert: *invert,
                    }
                }
                LineOp::Head(n) => ReadyOp::Head(*n),
                LineOp::Number => ReadyOp::Number,
                LineOp::Prefix(p) => ReadyOp::Prefix(expand(p, io)),
                LineOp::Tee(path) => ReadyOp::Tee(expand(path, io)),
            })
        })
        .collect()
}

fn run_filter(
    ops: &[LineOp],
    count: bool,
    io: &mut dyn StageIo,
    lines: &mut LineReader,
) -> Result<()> {
    let ops = prepare(ops, io)?;
    let mut seen = vec![0usize; ops.len()];
    for op in &ops {
        if let ReadyOp::Tee(path) = op {
            write_file(io.fs(), path, String::new())?;
        }
    }

    let mut passed = 0usize;
    'lines: while let Some(mut line) = lines.next_line(io)? {
        let mut exhausted = false;
        for (i, op) in ops.iter().enumerate() {
            match op {
                ReadyOp::Map(t) => line = t.apply(&line),
                ReadyOp::Grep { regex, invert } => {
                    if regex.is_match(&line) == *invert {
                        continue 'lines;
                    }
                }
                ReadyOp::Head(limit) => {
                    if seen[i] >= *limit {
                        break 'lines;
                    }
                    seen[i] += 1;
                    exhausted |= seen[i] == *limit;
                }
                ReadyOp::Number => {
                    seen[i] += 1;
                    line = format!("{:>6}\t{line}", seen[i]);
                }
                ReadyOp::Prefix(p) => line = format!("{p}{line}"),
                ReadyOp::Tee(path) => {
                    let fs = io.fs();
                    let mut content = read_file(fs, path).unwrap_or_default();
                    content.push_str(&line);
                    content.push('\n');
                    write_file(fs, path, content)?;
                }
            }
        }
        passed += 1;
        if !count {
            line.push('\n');
            io.write_stdout(line.as_bytes())?;
        }
        if exhausted {
            break;
        }
    }

    if count {
        io.write_stdout(format!("{passed}\n").as_bytes())?;
    }
    Ok(())
}

impl ModuleProgram for ScriptProgram {
    fn run(&self, io: &mut dyn StageIo) -> Result<()> {
        let mut lines = LineReader::new();
        for step in &self.steps {
            match step {
                Step::Action(Action::Emit(text)) => {
                    let mut out = expand(text, io);
                    out.push('\n');
                    io.write_stdout(out.as_bytes())?;
                }
                Step::Action(Action::Read(path)) => {
                    let path = expand(path, io);
                    let content = read_file(io.fs(), &path)
                        .with_context(|| format!("{path}: No such file or directory"))?;
                    io.write_stdout(content.as_bytes())?;
                }
                Step::Action(Action::Write { path, text }) => {
                    let path = expand(path, io);
                    let mut content = expand(text, io);
                    content.push('\n');
                    write_file(io.fs(), &path, content)?;
                }
                Step::Action(Action::Fail(message)) => {
                    anyhow::bail!("{}", expand(message, io));
                }
                Step::Filter { ops, count } => run_filter(ops, *count, io, &mut lines)?,
            }
        }
        tracing::trace!(script = %self.name, "filter script finished");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptCompiler;

impl ScriptCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleCompiler for ScriptCompiler {
    fn compile(&self, name: &str, bytes: &[u8]) -> Result<Arc<dyn ModuleProgram>> {
        let source = std::str::from_utf8(bytes).context("filter script is not valid UTF-8")?;
        let program = ScriptProgram::parse(name, source)?;
        tracing::debug!(
            script = %name,
            steps = program.steps.len(),
            reads_stdin = program.reads_stdin(),
            "filter script compiled"
        );
        Ok(Arc::new(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::fs::FsSnapshot;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::io;

    struct TestIo {
        args: Vec<String>,
        env: BTreeMap<String, String>,
        stdin: Vec<u8>,
        pos: usize,
        out: Vec<u8>,
        fs: FsSnapshot,
    }

    impl TestIo {
        fn new(args: &[&str], stdin: &str) -> Self {
            Self {
                args: args.iter().map(|a| a.to_string()).collect(),
                env: BTreeMap::from([("USER".to_string(), "ada".to_string())]),
                stdin: stdin.as_bytes().to_vec(),
                pos: 0,
                out: Vec::new(),
                fs: FsSnapshot::default(),
            }
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.out).into_owned()
        }
    }

    impl StageIo for TestIo {
        fn args(&self) -> &[String] {
            &self.args
        }

        fn env(&self) -> &BTreeMap<String, String> {
            &self.env
        }

        fn read_stdin(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // Small reads exercise line reassembly.
            let n = buf.len().min(3).min(self.stdin.len() - self.pos);
            buf[..n].copy_from_slice(&self.stdin[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
            self.out.extend_from_slice(data);
            Ok(())
        }

        fn fs(&mut self) -> &mut FsSnapshot {
            &mut self.fs
        }
    }

    fn run(source: &str, io: &mut TestIo) -> Result<()> {
        let program = ScriptCompiler.compile("t", source.as_bytes())?;
        program.run(io)
    }

    #[test]
    fn filter_chain_streams_lines() {
        let mut io = TestIo::new(&["find", "an"], "banana\ncherry\nMango\n");
        run("grep -i $1\nmap upper\nnumber\nemit done", &mut io).unwrap();
        assert_eq!(io.output(), "     1\tBANANA\n     2\tMANGO\ndone\n");
    }

    #[test]
    fn head_stops_reading_early() {
        let mut io = TestIo::new(&["h"], "a\nb\nc\nd\n");
        run("head 2", &mut io).unwrap();
        assert_eq!(io.output(), "a\nb\n");
        assert!(io.pos < io.stdin.len());
    }

    #[test]
    fn count_and_invert() {
        let mut io = TestIo::new(&["c"], "x1\ny\nx2\n");
        run("grep -v ^x\ncount", &mut io).unwrap();
        assert_eq!(io.output(), "1\n");
    }

    #[test]
    fn actions_expand_args_and_env() {
        let mut io = TestIo::new(&["greet", "bob", "amy"], "");
        run("emit hi ${USER}: $1 and $2 ($@) $$", &mut io).unwrap();
        assert_eq!(io.output(), "hi ada: bob and amy (bob amy) $\n");
    }

    #[test]
    fn files_are_written_to_the_snapshot() {
        let mut io = TestIo::new(&["save"], "one\ntwo\n");
        run("tee copy.txt\nwrite note.txt saved $1\nread note.txt", &mut io).unwrap();
        assert_eq!(io.output(), "one\ntwo\nsaved \n");
        assert_eq!(read_file(&io.fs, "copy.txt").as_deref(), Some("one\ntwo\n"));
    }

    #[test]
    fn fail_reports_message() {
        let mut io = TestIo::new(&["f", "disk"], "");
        let err = run("emit before\nfail no $1", &mut io).unwrap_err();
        assert_eq!(err.to_string(), "no disk");
        assert_eq!(io.output(), "before\n");
    }

    #[test]
    fn compile_errors_name_the_line() {
        let err = ScriptCompiler.compile("bad", b"emit ok\nfrobnicate\n").err().unwrap();
        assert_eq!(err.to_string(), "bad: line 2: unknown instruction `frobnicate`");
        assert!(ScriptCompiler.compile("bad", b"head many").is_err());
        assert!(ScriptCompiler.compile("bad", &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn scripts_without_filters_ignore_stdin() {
        let program = ScriptProgram::parse("e", "emit hi").unwrap();
        assert!(!program.reads_stdin());
        assert!(ScriptProgram::parse("c", "cat").unwrap().reads_stdin());
    }
}
