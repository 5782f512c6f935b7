//! Program assembler
//!
//! Pairs flow-opening and closing tokens and fills in their jump targets.
//! Hosts with their own compiler build [`Program`]s directly; the assembler
//! is the minimal producer used by the CLI and the tests.

use super::errors::ScriptError;
use super::types::{Block, FunctionDef, Program, Statement, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A block whose closing token has not been seen yet
#[derive(Debug)]
struct OpenBlock {
    block: Block,
    /// Index of the opening statement
    start: usize,
    /// Last link of an if-chain or case-chain
    last: usize,
    /// `else` or `default` already seen
    closed: bool,
}

#[derive(Debug)]
pub struct Assembler {
    name: String,
    statements: Vec<Statement>,
    lines: Vec<u32>,
    functions: Vec<FunctionDef>,
    open: Vec<OpenBlock>,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statements: Vec::new(),
            lines: Vec::new(),
            functions: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Index the next statement will get
    pub fn next_index(&self) -> usize {
        self.statements.len()
    }

    /// Append a statement, resolving its flow-control links
    pub fn push(&mut self, line: u32, mut tokens: Vec<Token>) -> Result<usize, ScriptError> {
        let index = self.statements.len();
        let Some(head) = tokens.first_mut() else {
            return Err(ScriptError::compile(index, "empty statement"));
        };

        match head.kind.clone() {
            TokenKind::If => self.open(Block::If, index),
            TokenKind::While => self.open(Block::While, index),
            TokenKind::For => self.open(Block::For, index),
            TokenKind::Switch => self.open(Block::Switch, index),
            TokenKind::Try => self.open(Block::Try, index),
            TokenKind::Catch => self.open(Block::Catch, index),
            TokenKind::Process => self.open(Block::Process, index),

            TokenKind::ElseIf | TokenKind::Else => {
                let is_else = head.kind == TokenKind::Else;
                let last = self.link(Block::If, index, &head.kind)?;
                self.set_jump(last, index);
                if is_else {
                    self.top_mut(Block::If, index)?.closed = true;
                }
            }

            TokenKind::Case | TokenKind::Default => {
                let is_default = head.kind == TokenKind::Default;
                if is_default && self.top_mut(Block::Switch, index)?.closed {
                    return Err(ScriptError::compile(index, "switch has two defaults"));
                }
                let last = self.link(Block::Switch, index, &head.kind)?;
                self.set_jump(last, index);
                if is_default {
                    self.top_mut(Block::Switch, index)?.closed = true;
                }
            }

            TokenKind::End(block) => {
                let open = match self.open.pop() {
                    Some(open) if open.block == block => open,
                    Some(open) => {
                        return Err(ScriptError::compile(
                            index,
                            format!(
                                "'end {}' closes '{}' opened at {}",
                                block.keyword(),
                                open.block.keyword(),
                                open.start
                            ),
                        ))
                    }
                    None => {
                        return Err(ScriptError::compile(
                            index,
                            format!("'end {}' without opener", block.keyword()),
                        ))
                    }
                };
                match block {
                    Block::If | Block::Switch => self.set_jump(open.last, index),
                    _ => self.set_jump(open.start, index),
                }
                head.jump = Some(open.start);
            }

            TokenKind::Break => {
                head.jump = self.innermost(&[Block::While, Block::For, Block::Switch]);
            }

            TokenKind::Continue => {
                head.jump = self.innermost(&[Block::While, Block::For]);
            }

            TokenKind::Function if head.jump.is_none() => {
                let name = head.name().unwrap_or_default().to_string();
                let position = self.functions.iter().position(|f| f.name == name);
                match position {
                    Some(fn_index) => head.jump = Some(fn_index),
                    None => {
                        return Err(ScriptError::compile(
                            index,
                            format!("function '{}' is not defined", name),
                        ))
                    }
                }
            }

            _ => {}
        }

        self.statements.push(Statement::new(tokens));
        self.lines.push(line);
        Ok(index)
    }

    /// Add a function definition and the statement that registers it
    pub fn function(&mut self, line: u32, def: FunctionDef) -> Result<usize, ScriptError> {
        let name = def.name.clone();
        self.functions.push(def);
        let token = Token {
            kind: TokenKind::Function,
            jump: Some(self.functions.len() - 1),
            value: Some(name.into()),
        };
        self.push(line, vec![token])
    }

    /// Add a definition without a registering statement
    pub fn define(&mut self, def: FunctionDef) {
        self.functions.push(def);
    }

    pub fn finish(self) -> Result<Program, ScriptError> {
        if let Some(open) = self.open.last() {
            return Err(ScriptError::compile(
                open.start,
                format!("'{}' without matching end", open.block.keyword()),
            ));
        }
        Program::new(self.name, self.statements, self.lines, self.functions)
    }

    fn open(&mut self, block: Block, index: usize) {
        self.open.push(OpenBlock {
            block,
            start: index,
            last: index,
            closed: false,
        });
    }

    /// Extend the chain of the innermost `block`; returns the previous link
    fn link(&mut self, block: Block, index: usize, kind: &TokenKind) -> Result<usize, ScriptError> {
        let open = self.top_mut(block, index)?;
        if open.closed {
            return Err(ScriptError::compile(
                index,
                format!("'{}' after final branch", kind.keyword()),
            ));
        }
        let last = open.last;
        open.last = index;
        Ok(last)
    }

    fn top_mut(&mut self, block: Block, index: usize) -> Result<&mut OpenBlock, ScriptError> {
        match self.open.last_mut() {
            Some(open) if open.block == block => Ok(open),
            _ => Err(ScriptError::compile(
                index,
                format!("statement outside '{}'", block.keyword()),
            )),
        }
    }

    fn set_jump(&mut self, at: usize, target: usize) {
        if let Some(statement) = self.statements.get_mut(at) {
            statement.tokens[0].jump = Some(target);
        }
    }

    fn innermost(&self, blocks: &[Block]) -> Option<usize> {
        self.open
            .iter()
            .rev()
            .find(|open| blocks.contains(&open.block))
            .map(|open| open.start)
    }
}

/* ===================== Source Programs ===================== */

/// Unresolved program as read from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProgram {
    pub name: String,
    pub statements: Vec<SourceStatement>,
    #[serde(default)]
    pub functions: Vec<SourceFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatement {
    pub line: u32,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFunction {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    pub statements: Vec<SourceStatement>,
}

impl SourceProgram {
    /// Resolve every jump target; `function` statements refer to definitions by name
    pub fn assemble(&self) -> Result<Program, ScriptError> {
        let mut asm = Assembler::new(self.name.clone());
        for function in &self.functions {
            asm.define(function.assemble()?);
        }
        for statement in &self.statements {
            asm.push(statement.line, statement.tokens.clone())?;
        }
        asm.finish()
    }
}

impl SourceFunction {
    fn assemble(&self) -> Result<FunctionDef, ScriptError> {
        let mut asm = Assembler::new(self.name.clone());
        for statement in &self.statements {
            asm.push(statement.line, statement.tokens.clone())?;
        }
        Ok(FunctionDef {
            name: self.name.clone(),
            params: self.params.clone(),
            body: Arc::new(asm.finish()?),
            parallel: self.parallel,
        })
    }
}
