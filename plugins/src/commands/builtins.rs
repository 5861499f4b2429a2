use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use conduit_core::resolver::{callback_fn, CallbackInput, CommandCallback};

use crate::fs::{read_file, remove_file, write_file};

pub const BUILTIN_NAMES: &[&str] = &[
    "cat", "clear", "echo", "env", "false", "hello", "ls", "rm", "tee", "true", "wc",
];

/// Looks up a native built-in command.
pub fn builtin(name: &str) -> Option<Arc<dyn CommandCallback>> {
    let cmd: Arc<dyn CommandCallback> = match name {
        "echo" => callback_fn(|args, _| Ok(Some(args[1..].join(" ")))),
        "hello" => callback_fn(|_, _| Ok(Some("Hello World!".to_string()))),
        "clear" => callback_fn(|_, _| Ok(Some("\x1b[2J\x1b[H".to_string()))),
        "true" => callback_fn(|_, _| Ok(None)),
        "false" => callback_fn(|_, _| Err(anyhow::anyhow!("exit status 1"))),
        "wc" => callback_fn(|args, stdin| wc(&args[1..], stdin).map(Some)),
        "cat" => Arc::new(Cat),
        "tee" => Arc::new(Tee),
        "ls" => Arc::new(Ls),
        "rm" => Arc::new(Rm),
        "env" => Arc::new(Env),
        _ => return None,
    };
    Some(cmd)
}

/// Callback output is printed with a trailing newline, so drop the one the
/// text already carries.
fn output(text: &str) -> Option<String> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    (!text.is_empty()).then(|| text.to_string())
}

fn wc(flags: &[String], stdin: &str) -> Result<String> {
    let lines = stdin.lines().count();
    let words = stdin.split_whitespace().count();
    let bytes = stdin.len();

    let mut picked = Vec::new();
    for flag in flags {
        match flag.as_str() {
            "-l" => picked.push(lines),
            "-w" => picked.push(words),
            "-c" => picked.push(bytes),
            other => anyhow::bail!("invalid option {other}"),
        }
    }
    if picked.is_empty() {
        picked = vec![lines, words, bytes];
    }
    Ok(picked
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(" "))
}

struct Cat;

#[async_trait]
impl CommandCallback for Cat {
    async fn call(&self, input: CallbackInput<'_>) -> Result<Option<String>> {
        let paths = &input.args[1..];
        if paths.is_empty() {
            return Ok(output(&input.stdin));
        }
        let mut out = String::new();
        for path in paths {
            let content = read_file(input.fs, path)
                .ok_or_else(|| anyhow::anyhow!("{path}: No such file or directory"))?;
            out.push_str(&content);
        }
        Ok(output(&out))
    }
}

struct Tee;

#[async_trait]
impl CommandCallback for Tee {
    async fn call(&self, input: CallbackInput<'_>) -> Result<Option<String>> {
        let mut append = false;
        for arg in &input.args[1..] {
            if arg == "-a" {
                append = true;
                continue;
            }
            let content = match (append, read_file(input.fs, arg)) {
                (true, Some(existing)) => existing + &input.stdin,
                _ => input.stdin.clone(),
            };
            write_file(input.fs, arg, content)?;
        }
        Ok(output(&input.stdin))
    }
}

struct Ls;

#[async_trait]
impl CommandCallback for Ls {
    async fn call(&self, input: CallbackInput<'_>) -> Result<Option<String>> {
        let Some(files) = input.fs.as_value().as_object() else {
            return Ok(None);
        };
        let prefix = input.args.get(1).map(String::as_str).unwrap_or("");
        let listing: Vec<&str> = files
            .keys()
            .map(String::as_str)
            .filter(|p| p.starts_with(prefix))
            .collect();
        Ok(output(&listing.join("\n")))
    }
}

struct Rm;

#[async_trait]
impl CommandCallback for Rm {
    async fn call(&self, input: CallbackInput<'_>) -> Result<Option<String>> {
        let paths = &input.args[1..];
        if paths.is_empty() {
            anyhow::bail!("missing operand");
        }
        for path in paths {
            if remove_file(input.fs, path).is_none() {
                anyhow::bail!("cannot remove '{path}': No such file or directory");
            }
        }
        Ok(None)
    }
}

struct Env;

#[async_trait]
impl CommandCallback for Env {
    async fn call(&self, input: CallbackInput<'_>) -> Result<Option<String>> {
        let env: &BTreeMap<String, String> = input.env;
        let lines: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Ok(output(&lines.join("\n")))
    }
}
