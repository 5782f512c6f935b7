//! Token types
//!
//! A statement is a sequence of tokens; its first token decides the statement
//! class. Flow-control tokens carry a jump target (`jump`) resolved by the
//! compiler or the [`Assembler`](crate::interpreter::Assembler):
//!
//! | opener               | `jump` points to                        |
//! |----------------------|-----------------------------------------|
//! | `If`, `ElseIf`       | next `ElseIf`, `Else` or `End(If)`      |
//! | `Else`               | `End(If)`                               |
//! | `While`, `For`       | matching `End(While)` / `End(For)`      |
//! | `Switch`             | first `Case`/`Default`, else `End(Switch)` |
//! | `Case`, `Default`    | next `Case`/`Default` or `End(Switch)`  |
//! | `Try`, `Catch`       | matching `End(Try)` / `End(Catch)`      |
//! | `Process`            | matching `End(Process)`                 |
//! | `Break`              | innermost `While`/`For`/`Switch`        |
//! | `Continue`           | innermost `While`/`For`                 |
//! | `End(_)`             | its opener                              |
//! | `Function`           | index into the program's function table |

use super::values::Val;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structure closed by an `End` token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Block {
    If,
    While,
    For,
    Switch,
    Try,
    Catch,
    Process,
}

impl Block {
    pub fn keyword(&self) -> &'static str {
        match self {
            Block::If => "if",
            Block::While => "while",
            Block::For => "for",
            Block::Switch => "switch",
            Block::Try => "try",
            Block::Catch => "catch",
            Block::Process => "process",
        }
    }
}

/// Expression operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

impl Op {
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
        }
    }
}

/// Token discriminant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum TokenKind {
    // Flow control
    If,
    ElseIf,
    Else,
    While,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Try,
    Catch,
    Throw,
    Return,
    Function,
    Call,
    End(Block),

    /// Parallel-block marker
    Process,

    // Built-in statements
    Set,
    Var,
    Delay,
    Pause,
    /// `exit` / `quit`: end the whole run from inside the script
    Exit,

    /// Host command, dispatched by name
    Command(String),

    // Expression tokens
    Ident,
    Literal,
    Op(Op),
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    In,
}

impl TokenKind {
    /// Tokens handled by the flow-control engine
    pub fn is_flow_control(&self) -> bool {
        matches!(
            self,
            TokenKind::If
                | TokenKind::ElseIf
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Switch
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Try
                | TokenKind::Catch
                | TokenKind::Throw
                | TokenKind::Return
                | TokenKind::Function
                | TokenKind::Call
                | TokenKind::End(_)
        )
    }

    /// Tokens whose `jump` must be present in a well-formed program
    pub fn requires_jump(&self) -> bool {
        matches!(
            self,
            TokenKind::If
                | TokenKind::ElseIf
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Switch
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::Try
                | TokenKind::Catch
                | TokenKind::Process
                | TokenKind::Function
                | TokenKind::End(_)
        )
    }

    pub fn keyword(&self) -> String {
        match self {
            TokenKind::If => "if".into(),
            TokenKind::ElseIf => "elseif".into(),
            TokenKind::Else => "else".into(),
            TokenKind::While => "while".into(),
            TokenKind::For => "for".into(),
            TokenKind::Switch => "switch".into(),
            TokenKind::Case => "case".into(),
            TokenKind::Default => "default".into(),
            TokenKind::Break => "break".into(),
            TokenKind::Continue => "continue".into(),
            TokenKind::Try => "try".into(),
            TokenKind::Catch => "catch".into(),
            TokenKind::Throw => "throw".into(),
            TokenKind::Return => "return".into(),
            TokenKind::Function => "function".into(),
            TokenKind::Call => "call".into(),
            TokenKind::End(block) => format!("end {}", block.keyword()),
            TokenKind::Process => "process".into(),
            TokenKind::Set => "set".into(),
            TokenKind::Var => "var".into(),
            TokenKind::Delay => "delay".into(),
            TokenKind::Pause => "pause".into(),
            TokenKind::Exit => "exit".into(),
            TokenKind::Command(name) => name.clone(),
            TokenKind::Ident => "identifier".into(),
            TokenKind::Literal => "literal".into(),
            TokenKind::Op(op) => op.symbol().into(),
            TokenKind::Assign => "=".into(),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Semicolon => ";".into(),
            TokenKind::In => "in".into(),
        }
    }
}

/// A single token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,

    /// Resolved jump target for flow-control kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<usize>,

    /// Identifier name, literal value, call target or catch variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Val>,
}

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            jump: None,
            value: None,
        }
    }

    pub fn with_value(kind: TokenKind, value: impl Into<Val>) -> Self {
        Self {
            kind,
            jump: None,
            value: Some(value.into()),
        }
    }

    pub fn ident(name: &str) -> Self {
        Self::with_value(TokenKind::Ident, name)
    }

    pub fn literal(value: impl Into<Val>) -> Self {
        Self::with_value(TokenKind::Literal, value)
    }

    pub fn op(op: Op) -> Self {
        Self::new(TokenKind::Op(op))
    }

    pub fn command(name: &str) -> Self {
        Self::new(TokenKind::Command(name.to_string()))
    }

    /// Name carried by identifier, call and catch tokens
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            Some(Val::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.value) {
            (TokenKind::Ident, Some(v)) => write!(f, "{}", v),
            (TokenKind::Literal, Some(Val::Str(s))) => write!(f, "\"{}\"", s),
            (TokenKind::Literal, Some(v)) => write!(f, "{}", v),
            (TokenKind::Call, Some(v)) => write!(f, "call {}", v),
            (TokenKind::Catch, Some(v)) => write!(f, "catch {}", v),
            (TokenKind::Process, Some(v)) => write!(f, "process {}", v),
            (kind, _) => f.write_str(&kind.keyword()),
        }
    }
}

/// Split `tokens` at top-level occurrences of `separator`, ignoring those
/// nested inside parentheses or brackets.
pub fn split_top_level<'a>(tokens: &'a [Token], separator: &TokenKind) -> Vec<&'a [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
            kind if depth == 0 && kind == separator => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Position of the first top-level token of `kind`
pub fn find_top_level(tokens: &[Token], kind: &TokenKind) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
            k if depth == 0 && k == kind => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_nesting() {
        // f(a, b), c
        let tokens = vec![
            Token::ident("f"),
            Token::new(TokenKind::LParen),
            Token::ident("a"),
            Token::new(TokenKind::Comma),
            Token::ident("b"),
            Token::new(TokenKind::RParen),
            Token::new(TokenKind::Comma),
            Token::ident("c"),
        ];
        let parts = split_top_level(&tokens, &TokenKind::Comma);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(parts[1], &[Token::ident("c")]);
    }

    #[test]
    fn test_split_empty_input_yields_one_empty_part() {
        let parts = split_top_level(&[], &TokenKind::Semicolon);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_empty());
    }

    #[test]
    fn test_flow_trait() {
        assert!(TokenKind::End(Block::Switch).is_flow_control());
        assert!(TokenKind::Call.is_flow_control());
        assert!(!TokenKind::Process.is_flow_control());
        assert!(!TokenKind::Command("echo".into()).is_flow_control());
    }
}
