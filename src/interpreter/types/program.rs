//! Program model
//!
//! A [`Program`] is the immutable, compiled form of a script: statements, a
//! parallel line-number table and the function definitions it contains.
//! Programs are shared by `Arc` between execution contexts and never copied.

use super::super::errors::ScriptError;
use super::token::{Block, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/* ===================== Statement ===================== */

/// An ordered, non-empty sequence of tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub tokens: Vec<Token>,
}

impl Statement {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn head(&self) -> &Token {
        &self.tokens[0]
    }

    pub fn kind(&self) -> &TokenKind {
        &self.tokens[0].kind
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens after the leading one
    pub fn args(&self) -> &[Token] {
        &self.tokens[1..]
    }

    /// Whether step mode should stop before this statement
    pub fn is_displayable(&self) -> bool {
        !matches!(self.kind(), TokenKind::End(_) | TokenKind::Else)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

/* ===================== Function Definition ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Arc<Program>,
    /// Parallel functions collect their `process` blocks and run them as a group
    #[serde(default)]
    pub parallel: bool,
}

/* ===================== Program ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProgramRepr")]
pub struct Program {
    name: String,
    statements: Vec<Statement>,
    lines: Vec<u32>,
    functions: Vec<FunctionDef>,
}

/// Unchecked wire form; deserialized programs are validated like built ones
#[derive(Deserialize)]
struct ProgramRepr {
    name: String,
    statements: Vec<Statement>,
    lines: Vec<u32>,
    #[serde(default)]
    functions: Vec<FunctionDef>,
}

impl TryFrom<ProgramRepr> for Program {
    type Error = ScriptError;

    fn try_from(repr: ProgramRepr) -> Result<Self, Self::Error> {
        Program::new(repr.name, repr.statements, repr.lines, repr.functions)
    }
}

impl Program {
    /// Build a program, checking every flow-control jump target
    pub fn new(
        name: impl Into<String>,
        statements: Vec<Statement>,
        lines: Vec<u32>,
        functions: Vec<FunctionDef>,
    ) -> Result<Self, ScriptError> {
        let program = Self {
            name: name.into(),
            statements,
            lines,
            functions,
        };
        program.validate()?;
        Ok(program)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statement(&self, index: usize) -> Option<&Statement> {
        self.statements.get(index)
    }

    pub fn line_of(&self, index: usize) -> Option<u32> {
        self.lines.get(index).copied()
    }

    pub fn function(&self, index: usize) -> Option<&FunctionDef> {
        self.functions.get(index)
    }

    pub fn functions(&self) -> &[FunctionDef] {
        &self.functions
    }

    /// Index of the first statement on or after `line`
    pub fn first_index_at_line(&self, line: u32) -> usize {
        self.lines
            .iter()
            .position(|l| *l >= line)
            .unwrap_or(self.statements.len())
    }

    /// Jump target of the statement at `index`
    pub fn jump_of(&self, index: usize) -> Result<usize, ScriptError> {
        self.statement(index)
            .and_then(|st| st.head().jump)
            .ok_or_else(|| ScriptError::compile(index, "missing jump target"))
    }

    /// Case/default indices of the switch opened at `index`, plus its `End(Switch)`
    pub fn switch_chain(&self, index: usize) -> Result<(Vec<usize>, usize), ScriptError> {
        let mut cases = Vec::new();
        let mut at = self.jump_of(index)?;
        for _ in 0..=self.statements.len() {
            match self.statements.get(at).map(|st| st.kind()) {
                Some(TokenKind::Case) | Some(TokenKind::Default) => {
                    cases.push(at);
                    at = self.jump_of(at)?;
                }
                Some(TokenKind::End(Block::Switch)) => return Ok((cases, at)),
                _ => break,
            }
        }
        Err(ScriptError::compile(index, "switch without end switch"))
    }

    /// Build a program from statements copied out of a larger one at `offset`
    ///
    /// Jump targets are shifted down by `offset`. Break and continue links
    /// that point outside the copied range are dropped; any other target
    /// outside it is an error.
    pub fn rebased(
        name: impl Into<String>,
        mut statements: Vec<Statement>,
        lines: Vec<u32>,
        offset: usize,
        functions: Vec<FunctionDef>,
    ) -> Result<Program, ScriptError> {
        let end = offset + statements.len();
        for (i, statement) in statements.iter_mut().enumerate() {
            let Some(head) = statement.tokens.first_mut() else {
                continue;
            };
            if head.kind == TokenKind::Function {
                continue;
            }
            let Some(target) = head.jump else {
                continue;
            };
            if (offset..end).contains(&target) {
                head.jump = Some(target - offset);
            } else if matches!(head.kind, TokenKind::Break | TokenKind::Continue) {
                head.jump = None;
            } else {
                return Err(ScriptError::compile(
                    offset + i,
                    "jump target leaves the process block",
                ));
            }
        }
        Program::new(name, statements, lines, functions)
    }

    fn validate(&self) -> Result<(), ScriptError> {
        if self.lines.len() != self.statements.len() {
            return Err(ScriptError::compile(
                0,
                format!(
                    "line table has {} entries for {} statements",
                    self.lines.len(),
                    self.statements.len()
                ),
            ));
        }
        for (index, statement) in self.statements.iter().enumerate() {
            if statement.is_empty() {
                return Err(ScriptError::compile(index, "empty statement"));
            }
            self.validate_head(index, statement.head())?;
        }
        Ok(())
    }

    fn validate_head(&self, index: usize, head: &Token) -> Result<(), ScriptError> {
        let Some(target) = head.jump else {
            if head.kind.requires_jump() {
                return Err(ScriptError::compile(index, "missing jump target"));
            }
            return Ok(());
        };

        if head.kind == TokenKind::Function {
            if target >= self.functions.len() {
                return Err(ScriptError::compile(index, "unknown function definition"));
            }
            return Ok(());
        }

        let Some(target_kind) = self.statements.get(target).map(|st| st.kind()) else {
            return Err(ScriptError::compile(
                index,
                format!("jump target {} out of range", target),
            ));
        };

        let forward = target > index;
        let ok = match &head.kind {
            TokenKind::If | TokenKind::ElseIf => {
                forward
                    && matches!(
                        target_kind,
                        TokenKind::ElseIf | TokenKind::Else | TokenKind::End(Block::If)
                    )
            }
            TokenKind::Else => forward && *target_kind == TokenKind::End(Block::If),
            TokenKind::While => forward && *target_kind == TokenKind::End(Block::While),
            TokenKind::For => forward && *target_kind == TokenKind::End(Block::For),
            TokenKind::Try => forward && *target_kind == TokenKind::End(Block::Try),
            TokenKind::Catch => forward && *target_kind == TokenKind::End(Block::Catch),
            TokenKind::Process => forward && *target_kind == TokenKind::End(Block::Process),
            TokenKind::Switch | TokenKind::Case | TokenKind::Default => {
                forward
                    && matches!(
                        target_kind,
                        TokenKind::Case | TokenKind::Default | TokenKind::End(Block::Switch)
                    )
            }
            TokenKind::Break => {
                !forward
                    && matches!(
                        target_kind,
                        TokenKind::While | TokenKind::For | TokenKind::Switch
                    )
            }
            TokenKind::Continue => {
                !forward && matches!(target_kind, TokenKind::While | TokenKind::For)
            }
            TokenKind::End(block) => !forward && opens(target_kind, *block),
            _ => true,
        };

        if ok {
            Ok(())
        } else {
            Err(ScriptError::compile(
                index,
                format!(
                    "'{}' cannot jump to '{}' at {}",
                    head.kind.keyword(),
                    target_kind.keyword(),
                    target
                ),
            ))
        }
    }
}

/// Whether `kind` is an opener closed by `End(block)`
fn opens(kind: &TokenKind, block: Block) -> bool {
    matches!(
        (kind, block),
        (TokenKind::If, Block::If)
            | (TokenKind::ElseIf, Block::If)
            | (TokenKind::Else, Block::If)
            | (TokenKind::While, Block::While)
            | (TokenKind::For, Block::For)
            | (TokenKind::Switch, Block::Switch)
            | (TokenKind::Try, Block::Try)
            | (TokenKind::Catch, Block::Catch)
            | (TokenKind::Process, Block::Process)
    )
}
