//! Test helpers for engine tests
//!
//! Common utilities for compiling scripts and building engines.
//!
//! The script syntax is line-oriented: one statement per line, `#` starts a
//! comment, blocks close with `end <keyword>`, and functions are written as
//! `[parallel] function name(a, b)` ... `end function`.

use crate::config::{Config, SchedulingMode};
use crate::interpreter::assembler::Assembler;
use crate::interpreter::engine::{Engine, ExecutionOutcome};
use crate::interpreter::errors::{CommandError, ScriptError};
use crate::interpreter::host::{CommandEffect, CommandHost, ScriptScope};
use crate::interpreter::types::{
    Block, FunctionDef, Op, Program, Statement, SuspendReason, Token, TokenKind, Val,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/* ===================== Compiling ===================== */

/// Compile a script and round-trip it through JSON
///
/// This helper:
/// - Tokenizes each line and assembles the program
/// - Serializes and deserializes (to test round-trip compatibility)
pub fn compile(source: &str) -> Arc<Program> {
    let program = try_compile(source).expect("Compile failed");
    let json = serde_json::to_string(&program).expect("Program serialization failed");
    let program: Program = serde_json::from_str(&json).expect("Program deserialization failed");
    Arc::new(program)
}

/// Compile without the JSON round trip, for testing compile errors
pub fn try_compile(source: &str) -> Result<Program, ScriptError> {
    let mut main = Assembler::new("main");
    let mut function: Option<(Assembler, FunctionDef, u32)> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let tokens = lex(text);

        if let Some((parallel, name, params)) = function_header(&tokens) {
            let def = FunctionDef {
                name: name.clone(),
                params,
                body: Arc::new(Program::new(name.clone(), vec![], vec![], vec![])?),
                parallel,
            };
            function = Some((Assembler::new(name), def, line));
            continue;
        }
        if is_word(&tokens, 0, "end") && is_word(&tokens, 1, "function") {
            let Some((asm, mut def, at)) = function.take() else {
                return Err(ScriptError::compile(main.next_index(), "end function without function"));
            };
            def.body = Arc::new(asm.finish()?);
            main.function(at, def)?;
            continue;
        }

        let statement = statement(tokens);
        match function.as_mut() {
            Some((asm, _, _)) => asm.push(line, statement)?,
            None => main.push(line, statement)?,
        };
    }

    if function.is_some() {
        return Err(ScriptError::compile(main.next_index(), "function without end function"));
    }
    main.finish()
}

fn is_word(tokens: &[Token], at: usize, word: &str) -> bool {
    tokens
        .get(at)
        .is_some_and(|t| t.kind == TokenKind::Ident && t.name() == Some(word))
}

/// `[parallel] function name(a, b)`
fn function_header(tokens: &[Token]) -> Option<(bool, String, Vec<String>)> {
    let parallel = is_word(tokens, 0, "parallel");
    let at = usize::from(parallel);
    if !is_word(tokens, at, "function") {
        return None;
    }
    let name = tokens.get(at + 1)?.name()?.to_string();
    let params = tokens[at + 2..]
        .iter()
        .filter(|t| t.kind == TokenKind::Ident)
        .filter_map(|t| t.name().map(str::to_string))
        .collect();
    Some((parallel, name, params))
}

/// Turn the leading word into the statement's head token
fn statement(mut tokens: Vec<Token>) -> Vec<Token> {
    let word = match tokens.first() {
        Some(t) if t.kind == TokenKind::Ident => t.name().unwrap_or_default().to_string(),
        _ => return tokens,
    };
    let rest = tokens.split_off(1);
    let head = |kind: TokenKind| {
        let mut out = vec![Token::new(kind)];
        out.extend(rest.iter().cloned());
        out
    };
    // Head carrying a name: `call f`, `catch e`, `process p`
    let named = |kind: TokenKind| match rest.split_first() {
        Some((name, args)) if name.kind == TokenKind::Ident => {
            let mut out = vec![Token::with_value(kind, name.name().unwrap_or_default())];
            out.extend(args.iter().cloned());
            out
        }
        _ => vec![Token::new(kind)],
    };

    match word.as_str() {
        "if" => head(TokenKind::If),
        "elseif" => head(TokenKind::ElseIf),
        "else" if rest.first().is_some_and(|t| t.name() == Some("if")) => {
            let mut out = vec![Token::new(TokenKind::ElseIf)];
            out.extend(rest[1..].iter().cloned());
            out
        }
        "else" => head(TokenKind::Else),
        "while" => head(TokenKind::While),
        "for" => head(TokenKind::For),
        "switch" => head(TokenKind::Switch),
        "case" => head(TokenKind::Case),
        "default" => head(TokenKind::Default),
        "break" => head(TokenKind::Break),
        "continue" => head(TokenKind::Continue),
        "try" => head(TokenKind::Try),
        "throw" => head(TokenKind::Throw),
        "return" => head(TokenKind::Return),
        "set" => head(TokenKind::Set),
        "delay" => head(TokenKind::Delay),
        "pause" => head(TokenKind::Pause),
        "exit" | "quit" => head(TokenKind::Exit),
        "call" => named(TokenKind::Call),
        "catch" => named(TokenKind::Catch),
        "process" => named(TokenKind::Process),
        "end" => {
            let block = match rest.first().and_then(|t| t.name()) {
                Some("if") => Block::If,
                Some("while") => Block::While,
                Some("for") => Block::For,
                Some("switch") => Block::Switch,
                Some("try") => Block::Try,
                Some("catch") => Block::Catch,
                Some("process") => Block::Process,
                other => panic!("unknown block end: {:?}", other),
            };
            vec![Token::new(TokenKind::End(block))]
        }
        _ if rest.first().is_some_and(|t| t.kind == TokenKind::Assign) => {
            let mut out = vec![Token::ident(&word)];
            out.extend(rest.iter().cloned());
            out
        }
        _ => {
            let mut out = vec![Token::command(&word)];
            out.extend(rest.iter().cloned());
            out
        }
    }
}

/// Split a line into tokens
fn lex(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '"')
                .map(|p| i + 1 + p)
                .expect("unterminated string");
            let s: String = chars[i + 1..end].iter().collect();
            tokens.push(Token::literal(s));
            i = end + 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = match text.parse::<i64>() {
                Ok(n) => Val::Int(n),
                Err(_) => Val::Num(text.parse().expect("bad number")),
            };
            tokens.push(Token::literal(value));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::literal(true),
                "false" => Token::literal(false),
                "null" => Token::literal(Val::Null),
                "in" => Token::new(TokenKind::In),
                "var" => Token::new(TokenKind::Var),
                _ => Token::ident(&word),
            });
            continue;
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let double = match two.as_str() {
            "==" => Some(Token::op(Op::Eq)),
            "!=" => Some(Token::op(Op::Ne)),
            "<=" => Some(Token::op(Op::Le)),
            ">=" => Some(Token::op(Op::Ge)),
            "&&" => Some(Token::op(Op::And)),
            "||" => Some(Token::op(Op::Or)),
            _ => None,
        };
        if let Some(token) = double {
            tokens.push(token);
            i += 2;
            continue;
        }

        tokens.push(match c {
            '+' => Token::op(Op::Add),
            '-' => Token::op(Op::Sub),
            '*' => Token::op(Op::Mul),
            '/' => Token::op(Op::Div),
            '%' => Token::op(Op::Mod),
            '<' => Token::op(Op::Lt),
            '>' => Token::op(Op::Gt),
            '!' => Token::op(Op::Not),
            '=' => Token::new(TokenKind::Assign),
            '(' => Token::new(TokenKind::LParen),
            ')' => Token::new(TokenKind::RParen),
            '[' => Token::new(TokenKind::LBracket),
            ']' => Token::new(TokenKind::RBracket),
            ',' => Token::new(TokenKind::Comma),
            ';' => Token::new(TokenKind::Semicolon),
            other => panic!("unexpected character '{}'", other),
        });
        i += 1;
    }
    tokens
}

/* ===================== Engines ===================== */

pub fn engine(mode: SchedulingMode) -> (Engine, Arc<RecordingHost>) {
    engine_with(mode, |_| {})
}

/// Engine with a recording host and a tweaked default config
pub fn engine_with(
    mode: SchedulingMode,
    tune: impl FnOnce(&mut Config),
) -> (Engine, Arc<RecordingHost>) {
    let mut config = Config::default();
    config.engine.mode = mode;
    tune(&mut config);
    let host = Arc::new(RecordingHost::default());
    (Engine::new(config, host.clone()), host)
}

/// Resume immediately until the outcome is not a suspension
pub fn resume_all(
    engine: &Engine,
    mut outcome: ExecutionOutcome,
) -> (ExecutionOutcome, Vec<SuspendReason>) {
    let mut reasons = Vec::new();
    while let ExecutionOutcome::Suspended(suspended) = outcome {
        assert!(reasons.len() < 10_000, "too many suspensions");
        reasons.push(suspended.reason.clone());
        outcome = engine.resume(suspended);
    }
    (outcome, reasons)
}

/// Value of a completed run; panics with the report otherwise
pub fn completed(outcome: ExecutionOutcome) -> Val {
    match outcome {
        ExecutionOutcome::Completed(value) => value,
        ExecutionOutcome::Error(report) => panic!("script failed: {}", report),
        other => panic!("script did not complete: {:?}", other),
    }
}

/* ===================== Recording Host ===================== */

/// Host that records what scripts do
///
/// Commands:
/// - `echo expr` / `print expr` - append the value to `output`
/// - `fail "message"` - command failure
/// - `wait ms` - host wait with reason "wait"
/// - `script name` - run a registered program as a nested script
/// - `work "name"` - hold a per-name activity counter for 20 ms
#[derive(Debug, Default)]
pub struct RecordingHost {
    output: Mutex<Vec<String>>,
    history: Mutex<Vec<String>>,
    reports: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Arc<Program>>>,
    active: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
    resets: AtomicUsize,
}

impl RecordingHost {
    pub fn output(&self) -> Vec<String> {
        self.output.lock().unwrap().clone()
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Most members of one name ever working at the same time
    pub fn peak(&self, name: &str) -> usize {
        self.peak.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn add_script(&self, name: &str, program: Arc<Program>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), program);
    }

    fn text(statement: &Statement, scope: &mut dyn ScriptScope) -> Result<String, ScriptError> {
        if statement.args().is_empty() {
            return Ok(String::new());
        }
        Ok(scope.evaluate(statement.args())?.to_string())
    }
}

impl CommandHost for RecordingHost {
    fn dispatch(
        &self,
        command: &str,
        statement: &Statement,
        scope: &mut dyn ScriptScope,
    ) -> Result<CommandEffect, CommandError> {
        match command {
            "echo" | "print" => {
                let text = Self::text(statement, scope)?;
                self.output.lock().unwrap().push(text);
                Ok(CommandEffect::Continue)
            }
            "fail" => Err(CommandError::Failed(Self::text(statement, scope)?)),
            "wait" => {
                let ms = scope.evaluate(statement.args())?.as_i64().unwrap_or(0);
                Ok(CommandEffect::Wait {
                    reason: SuspendReason::Host("wait".into()),
                    duration: Duration::from_millis(ms.max(0) as u64),
                })
            }
            "script" => {
                let name = statement.args().first().and_then(|t| t.name()).unwrap_or_default();
                match self.scripts.lock().unwrap().get(name) {
                    Some(program) => Ok(CommandEffect::RunScript(program.clone())),
                    None => Err(CommandError::InvalidArgument(name.to_string())),
                }
            }
            "work" => {
                let name = Self::text(statement, scope)?;
                {
                    let mut active = self.active.lock().unwrap();
                    let count = active.entry(name.clone()).or_default();
                    *count += 1;
                    let mut peak = self.peak.lock().unwrap();
                    let top = peak.entry(name.clone()).or_default();
                    *top = (*top).max(*count);
                }
                std::thread::sleep(Duration::from_millis(20));
                *self.active.lock().unwrap().entry(name.clone()).or_default() -= 1;
                self.output.lock().unwrap().push(name);
                Ok(CommandEffect::Continue)
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    fn add_history(&self, statement: &Statement) {
        self.history.lock().unwrap().push(statement.to_string());
    }

    fn report(&self, message: &str) {
        self.reports.lock().unwrap().push(message.to_string());
    }

    fn reset_error(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
