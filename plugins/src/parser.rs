//! Single-line shell-style parser.
//!
//! Understands words with single/double quotes and backslash escapes,
//! leading `NAME=value` assignments, pipes, file redirects and `;`. Lists
//! joined by `&&`/`||`, background jobs and subshells are reported as
//! unsupported nodes rather than rejected, so the engine can name them.

use anyhow::Result;
use conduit_core::ast::{CommandNode, CommandParser, Node, Redirect, Word};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ASSIGNMENT: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word { text: String, quoted: bool },
    Pipe,
    Semi,
    AndIf,
    OrIf,
    Background,
    Redirect(&'static str),
    Open,
    Close,
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    let mut word = String::new();
    let mut in_word = false;
    let mut quoted = false;

    macro_rules! flush {
        () => {
            if in_word {
                tokens.push(Token::Word {
                    text: std::mem::take(&mut word),
                    quoted,
                });
                in_word = false;
                quoted = false;
            }
        };
    }

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\r' | '\n' => flush!(),
            '#' if !in_word => break,
            '\'' => {
                quoted |= !in_word;
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => anyhow::bail!("unterminated single quote"),
                    }
                }
            }
            '"' => {
                quoted |= !in_word;
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => anyhow::bail!("unterminated double quote"),
                        },
                        Some(ch) => word.push(ch),
                        None => anyhow::bail!("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => word.push(ch),
                    None => anyhow::bail!("trailing backslash"),
                }
            }
            '|' => {
                flush!();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::OrIf);
                } else {
                    tokens.push(Token::Pipe);
                }
            }
            '&' => {
                flush!();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::AndIf);
                } else {
                    tokens.push(Token::Background);
                }
            }
            ';' => {
                flush!();
                tokens.push(Token::Semi);
            }
            '(' => {
                flush!();
                tokens.push(Token::Open);
            }
            ')' => {
                flush!();
                tokens.push(Token::Close);
            }
            '>' => {
                flush!();
                if chars.next_if_eq(&'>').is_some() {
                    tokens.push(Token::Redirect(">>"));
                } else {
                    tokens.push(Token::Redirect(">"));
                }
            }
            '<' => {
                flush!();
                tokens.push(Token::Redirect("<"));
            }
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    flush!();
    Ok(tokens)
}

fn unsupported_kind(statement: &[Token]) -> Option<&'static str> {
    statement.iter().find_map(|t| match t {
        Token::Open | Token::Close => Some("subshell"),
        Token::AndIf | Token::OrIf => Some("and_or_list"),
        Token::Background => Some("background_job"),
        _ => None,
    })
}

fn parse_segment(segment: &[Token]) -> Result<CommandNode> {
    let mut node = CommandNode::default();
    let mut has_command = false;
    let mut iter = segment.iter();

    while let Some(token) = iter.next() {
        match token {
            Token::Word { text, quoted } => {
                if has_command {
                    node.args.push(Word::new(text.clone()));
                    continue;
                }
                if let Some(caps) = ASSIGNMENT.captures(text).filter(|_| !quoted) {
                    node.env.insert(caps[1].to_string(), Word::new(&caps[2]));
                } else {
                    node.command = Word::new(text.clone());
                    has_command = true;
                }
            }
            Token::Redirect(op) => match iter.next() {
                Some(Token::Word { text, .. }) => node.redirects.push(Redirect::File {
                    op: op.to_string(),
                    target: Word::new(text.clone()),
                }),
                _ => anyhow::bail!("syntax error: missing target after `{op}`"),
            },
            other => anyhow::bail!("syntax error near {other:?}"),
        }
    }

    if !has_command {
        anyhow::bail!("syntax error: empty command");
    }
    Ok(node)
}

fn parse_statement(statement: &[Token]) -> Result<Node> {
    if let Some(kind) = unsupported_kind(statement) {
        return Ok(Node::Unsupported {
            kind: kind.to_string(),
        });
    }

    let mut chain: Option<CommandNode> = None;
    for segment in statement.split(|t| *t == Token::Pipe) {
        let node = parse_segment(segment)
            .map_err(|e| if chain.is_some() { e.context("after `|`") } else { e })?;
        chain = Some(match chain {
            Some(head) => head.pipe_into(node),
            None => node,
        });
    }
    chain
        .map(Node::Command)
        .ok_or_else(|| anyhow::anyhow!("syntax error: empty command"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl LineParser {
    pub fn new() -> Self {
        Self
    }
}

impl CommandParser for LineParser {
    fn parse(&self, line: &str) -> Result<Vec<Node>> {
        let tokens = tokenize(line)?;
        tokens
            .split(|t| *t == Token::Semi)
            .filter(|statement| !statement.is_empty())
            .map(parse_statement)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Vec<Node> {
        LineParser.parse(line).unwrap()
    }

    #[test]
    fn pipeline_becomes_nested_pipe_redirects() {
        let nodes = parse("cat notes.txt | grep -i 'hello world' | wc -l");
        let expected = CommandNode::new("cat", &["notes.txt"])
            .pipe_into(CommandNode::new("grep", &["-i", "hello world"]))
            .pipe_into(CommandNode::new("wc", &["-l"]));
        assert_eq!(nodes, vec![Node::Command(expected)]);
    }

    #[test]
    fn leading_assignments_are_env() {
        let nodes = parse("GREETING=hi NAME=\"a b\" echo $GREETING X=1");
        let Node::Command(cmd) = &nodes[0] else {
            panic!("expected command");
        };
        assert_eq!(cmd.command.value, "echo");
        assert_eq!(cmd.env.get("GREETING").map(|w| w.value.as_str()), Some("hi"));
        assert_eq!(cmd.env.get("NAME").map(|w| w.value.as_str()), Some("a b"));
        assert_eq!(
            cmd.args.iter().map(|w| w.value.as_str()).collect::<Vec<_>>(),
            vec!["$GREETING", "X=1"]
        );
    }

    #[test]
    fn semicolons_split_top_level_nodes() {
        assert_eq!(parse("echo a; echo b;").len(), 2);
        assert!(parse("   ").is_empty());
    }

    #[test]
    fn and_or_and_subshells_are_unsupported() {
        assert_eq!(
            parse("true && echo ok"),
            vec![Node::Unsupported {
                kind: "and_or_list".into()
            }]
        );
        assert_eq!(
            parse("(echo a)"),
            vec![Node::Unsupported {
                kind: "subshell".into()
            }]
        );
    }

    #[test]
    fn file_redirects_are_kept() {
        let nodes = parse("echo hi >> out.txt");
        let Node::Command(cmd) = &nodes[0] else {
            panic!("expected command");
        };
        assert_eq!(
            cmd.redirects,
            vec![Redirect::File {
                op: ">>".into(),
                target: Word::new("out.txt")
            }]
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(LineParser.parse("echo 'open").is_err());
        assert!(LineParser.parse("echo a |").is_err());
        assert!(LineParser.parse("| wc").is_err());
        assert!(LineParser.parse("echo >").is_err());
    }
}
