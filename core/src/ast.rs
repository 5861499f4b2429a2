//! Parsed command-line tree handed to the stage resolver.
//!
//! The grammar lives outside this crate; a parser only has to produce the
//! shapes below. A pipeline `a | b | c` is one `CommandNode` for `a` whose
//! first redirect is a pipe into `b`, which in turn pipes into `c`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Word {
    pub value: String,
}

impl Word {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Command(CommandNode),
    /// Any construct the pipeline engine does not run (subshells, `&&`
    /// chains, loops...). `kind` names it for diagnostics.
    Unsupported { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandNode {
    pub command: Word,
    #[serde(default)]
    pub args: Vec<Word>,
    #[serde(default)]
    pub env: BTreeMap<String, Word>,
    #[serde(default)]
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Redirect {
    Pipe { command: Box<CommandNode> },
    File { op: String, target: Word },
}

impl CommandNode {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: Word::new(command),
            args: args.iter().map(|a| Word::new(*a)).collect(),
            env: BTreeMap::new(),
            redirects: Vec::new(),
        }
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), Word::new(value));
        self
    }

    /// Appends `next` at the tail of this node's pipe chain.
    pub fn pipe_into(mut self, next: CommandNode) -> Self {
        match self.piped_mut() {
            Some(inner) => {
                let tail = std::mem::take(inner);
                *inner = tail.pipe_into(next);
            }
            None => self.redirects.push(Redirect::Pipe {
                command: Box::new(next),
            }),
        }
        self
    }

    /// The command this node pipes into, if its first redirect is a pipe.
    pub fn piped(&self) -> Option<&CommandNode> {
        match self.redirects.first() {
            Some(Redirect::Pipe { command }) => Some(command.as_ref()),
            _ => None,
        }
    }

    fn piped_mut(&mut self) -> Option<&mut CommandNode> {
        match self.redirects.first_mut() {
            Some(Redirect::Pipe { command }) => Some(command.as_mut()),
            _ => None,
        }
    }
}

/// Turns a command string into top-level nodes.
pub trait CommandParser: Send + Sync {
    fn parse(&self, line: &str) -> anyhow::Result<Vec<Node>>;
}
