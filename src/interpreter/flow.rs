//! Flow-control statements
//!
//! Every handler returns a [`Step`] telling the dispatch loop where the
//! cursor goes next. Loops keep their context across iterations: the
//! closing token marks the cursor for re-entry and jumps back to the
//! opener, which re-evaluates without pushing again.

use super::context::{ContextKind, ARGUMENTS, RETVAL, THROWN_VALUE};
use super::engine::Run;
use super::errors::ScriptError;
use super::host::ScriptScope;
use super::parallel::ProcessGroup;
use super::types::token::{find_top_level, split_top_level};
use super::types::{
    Block, Pending, Program, Statement, Step, SuspendReason, Token, TokenKind, Val, WaitRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Resolved jump target of a flow token
fn target(head: &Token, pc: usize) -> Result<usize, ScriptError> {
    head.jump
        .ok_or_else(|| ScriptError::compile(pc, "missing jump target"))
}

/// `throw context name`
fn context_name(args: &[Token]) -> Option<&str> {
    match args {
        [keyword, name]
            if keyword.kind == TokenKind::Ident
                && keyword.name() == Some("context")
                && name.kind == TokenKind::Ident =>
        {
            name.name()
        }
        _ => None,
    }
}

/// `( ... )` around the whole clause list is optional
fn strip_parens(tokens: &[Token]) -> &[Token] {
    let wrapped = matches!(
        (tokens.first(), tokens.last()),
        (Some(first), Some(last)) if tokens.len() >= 2
            && first.kind == TokenKind::LParen
            && last.kind == TokenKind::RParen
    );
    if !wrapped {
        return tokens;
    }
    // `(a) + (b)` closes before the end and is not wrapped
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i + 1 < tokens.len() {
                    return tokens;
                }
            }
            _ => {}
        }
    }
    &tokens[1..tokens.len() - 1]
}

impl Run<'_> {
    pub(crate) fn flow(
        &mut self,
        pc: usize,
        statement: &Statement,
        program: &Arc<Program>,
    ) -> Result<Step, ScriptError> {
        let head = statement.head();
        let args = statement.args();

        match &head.kind {
            /* ===================== If ===================== */
            TokenKind::If | TokenKind::ElseIf => {
                let next = target(head, pc)?;
                let done = head.kind == TokenKind::ElseIf && self.is_marked(pc);
                let ok = !done && self.condition(args)?;
                self.set_mark(next, done || ok);
                Ok(if ok { Step::Next } else { Step::Jump(next) })
            }
            TokenKind::Else => {
                if self.is_marked(pc) {
                    Ok(Step::Jump(target(head, pc)?))
                } else {
                    Ok(Step::Next)
                }
            }
            TokenKind::End(Block::If) => Ok(Step::Next),

            /* ===================== Loops ===================== */
            TokenKind::While => {
                let end = target(head, pc)?;
                if !self.take_reentry() {
                    self.stack.push(ContextKind::Loop { end }, None)?;
                }
                self.check_stop()?;
                let more = self.condition(args)?;
                self.loop_step(more, end)
            }
            TokenKind::For => {
                let end = target(head, pc)?;
                let entering = !self.take_reentry();
                if entering {
                    self.stack.push(ContextKind::Loop { end }, None)?;
                }
                self.check_stop()?;
                let more = self.for_clauses(entering, args)?;
                self.loop_step(more, end)
            }
            TokenKind::End(Block::While) | TokenKind::End(Block::For) => {
                let opener = target(head, pc)?;
                match self.stack.top_mut() {
                    Some(top) if matches!(top.kind, ContextKind::Loop { .. }) => {
                        top.cursor.reentry = true;
                        Ok(Step::Jump(opener))
                    }
                    _ => Err(ScriptError::compile(pc, "loop end without active loop")),
                }
            }
            TokenKind::Break => {
                let levels = self.level_count(args)?;
                if levels <= 0 {
                    return Ok(Step::Next);
                }
                self.break_out(levels, false)
            }
            TokenKind::Continue => {
                let levels = self.level_count(args)?;
                if levels <= 0 {
                    return Ok(Step::Next);
                }
                self.break_out(levels, true)
            }

            /* ===================== Switch ===================== */
            TokenKind::Switch => {
                let scrutinee = self.value(args)?;
                let (cases, end) = program.switch_chain(pc)?;
                self.stack.push(
                    ContextKind::Switch {
                        end,
                        scrutinee: Some(scrutinee),
                    },
                    None,
                )?;
                Ok(Step::Jump(cases.first().copied().unwrap_or(end)))
            }
            TokenKind::Case => {
                let next = target(head, pc)?;
                let (end, scrutinee) = self.active_switch(pc)?;
                let Some(scrutinee) = scrutinee else {
                    return Ok(Step::Jump(end));
                };
                let value = self.value(args)?;
                if !scrutinee.loosely_equals(&value) {
                    return Ok(Step::Jump(next));
                }
                if let Some(ContextKind::Switch { scrutinee, .. }) =
                    self.stack.top_mut().map(|top| &mut top.kind)
                {
                    *scrutinee = None;
                }
                Ok(Step::Next)
            }
            TokenKind::Default => {
                let next = target(head, pc)?;
                let (end, scrutinee) = self.active_switch(pc)?;
                // Taken from `end switch` when no case matched
                Ok(Step::Jump(if scrutinee.is_some() { next } else { end }))
            }
            TokenKind::End(Block::Switch) => {
                let opener = target(head, pc)?;
                let (_, scrutinee) = self.active_switch(pc)?;
                if scrutinee.is_some() {
                    let (cases, _) = program.switch_chain(opener)?;
                    let default = cases.into_iter().find(|at| {
                        program
                            .statement(*at)
                            .is_some_and(|st| *st.kind() == TokenKind::Default)
                    });
                    if let Some(default) = default {
                        if let Some(ContextKind::Switch { scrutinee, .. }) =
                            self.stack.top_mut().map(|top| &mut top.kind)
                        {
                            *scrutinee = None;
                        }
                        return Ok(Step::Jump(default + 1));
                    }
                }
                self.stack.pop(true);
                Ok(Step::Next)
            }

            /* ===================== Try / Catch ===================== */
            TokenKind::Try => {
                let end = target(head, pc)?;
                self.stack.push(ContextKind::Try { end, pending: None }, None)?;
                self.stack.last_error = None;
                self.engine.host.reset_error();
                Ok(Step::Next)
            }
            TokenKind::End(Block::Try) => self.try_end(pc, program),
            TokenKind::Catch => Ok(Step::Jump(target(head, pc)? + 1)),
            TokenKind::End(Block::Catch) => {
                self.expect_top(pc, |kind| matches!(kind, ContextKind::Catch { .. }))?;
                self.stack.pop(true);
                Ok(Step::Next)
            }
            TokenKind::Throw => {
                if let Some(name) = context_name(args) {
                    tracing::debug!(context = %name, "context parked by throw");
                    return Ok(Step::Wait(WaitRequest::new(
                        SuspendReason::Context(name.to_string()),
                        Duration::ZERO,
                    )));
                }
                let value = if args.is_empty() {
                    Val::Str("thrown".into())
                } else {
                    self.value(args)?
                };
                let message = value.to_string();
                self.engine.set_global(THROWN_VALUE, value);
                Err(ScriptError::Thrown { message })
            }

            /* ===================== Functions ===================== */
            TokenKind::Function => {
                let index = target(head, pc)?;
                let def = program
                    .function(index)
                    .ok_or_else(|| ScriptError::compile(pc, "unknown function definition"))?;
                self.engine.register_function(def.clone());
                Ok(Step::Next)
            }
            TokenKind::Call => {
                let name = head
                    .name()
                    .ok_or_else(|| ScriptError::invalid_argument("call without function name"))?
                    .to_string();
                let values = self.list(args)?;
                self.enter_function(&name, values)?;
                Ok(Step::Entered)
            }
            TokenKind::Return => {
                let value = if args.is_empty() {
                    Val::Null
                } else {
                    self.value(args)?
                };
                self.return_value(value)
            }

            TokenKind::End(Block::Process) => {
                self.expect_top(pc, |kind| matches!(kind, ContextKind::Process { .. }))?;
                self.stack.pop(true);
                Ok(Step::Next)
            }

            other => Err(ScriptError::compile(
                pc,
                format!("'{}' is not a flow statement", other.keyword()),
            )),
        }
    }

    /* ===================== Helpers ===================== */

    fn is_marked(&self, pc: usize) -> bool {
        self.stack
            .owner_index()
            .and_then(|owner| self.stack.get(owner))
            .and_then(|owner| owner.marks.as_ref())
            .is_some_and(|marks| marks.contains(&pc))
    }

    fn set_mark(&mut self, pc: usize, done: bool) {
        if let Some(marks) = self.stack.marks_mut() {
            if done {
                marks.insert(pc);
            } else {
                marks.remove(&pc);
            }
        }
    }

    fn take_reentry(&mut self) -> bool {
        self.stack
            .top_mut()
            .map(|top| std::mem::take(&mut top.cursor.reentry))
            .unwrap_or(false)
    }

    /// Continue into the body, or leave the loop past its end
    fn loop_step(&mut self, more: bool, end: usize) -> Result<Step, ScriptError> {
        if more {
            return Ok(Step::Next);
        }
        self.stack.pop(true);
        Ok(Step::Jump(end + 1))
    }

    fn level_count(&mut self, args: &[Token]) -> Result<i64, ScriptError> {
        if args.is_empty() {
            return Ok(1);
        }
        let value = self.value(args)?;
        value
            .as_i64()
            .ok_or_else(|| ScriptError::invalid_argument(value))
    }

    fn expect_top(
        &self,
        pc: usize,
        expected: impl Fn(&ContextKind) -> bool,
    ) -> Result<(), ScriptError> {
        match self.stack.top() {
            Some(top) if expected(&top.kind) => Ok(()),
            Some(top) => Err(ScriptError::compile(
                pc,
                format!("closing token inside '{}'", top.kind.label()),
            )),
            None => Err(ScriptError::compile(pc, "closing token without context")),
        }
    }

    fn active_switch(&self, pc: usize) -> Result<(usize, Option<Val>), ScriptError> {
        match self.stack.top().map(|top| &top.kind) {
            Some(ContextKind::Switch { end, scrutinee }) => Ok((*end, scrutinee.clone())),
            _ => Err(ScriptError::compile(pc, "case outside switch")),
        }
    }

    /* ===================== For ===================== */

    /// Run the `for` header; true to execute the body
    fn for_clauses(&mut self, entering: bool, args: &[Token]) -> Result<bool, ScriptError> {
        let clauses = strip_parens(args);

        if find_top_level(clauses, &TokenKind::Semicolon).is_some() {
            let parts = split_top_level(clauses, &TokenKind::Semicolon);
            let [init, test, step] = parts.as_slice() else {
                return Err(ScriptError::invalid_argument(
                    "for needs initializer; condition; increment",
                ));
            };
            self.clause(if entering { init } else { step })?;
            return Ok(test.is_empty() || self.condition(test)?);
        }

        match find_top_level(clauses, &TokenKind::In) {
            Some(at) => self.next_item(entering, &clauses[..at], &clauses[at + 1..]),
            None => Err(ScriptError::invalid_argument("for without ';' or 'in'")),
        }
    }

    /// Assignment clause, optionally declaring with `var`
    fn clause(&mut self, tokens: &[Token]) -> Result<(), ScriptError> {
        match tokens.first().map(|t| &t.kind) {
            None => Ok(()),
            Some(TokenKind::Var) => self.assignment(&tokens[1..], true).map(|_| ()),
            Some(_) => self.assignment(tokens, false).map(|_| ()),
        }
    }

    /// Bind the next element of the collection; false once exhausted
    ///
    /// The collection and the cursor live in the loop's own scope so they
    /// survive suspension.
    fn next_item(
        &mut self,
        entering: bool,
        binding: &[Token],
        expr: &[Token],
    ) -> Result<bool, ScriptError> {
        let (local, ident) = match binding {
            [var, ident] if var.kind == TokenKind::Var => (true, ident),
            [ident] => (false, ident),
            _ => return Err(ScriptError::invalid_argument("for loop variable")),
        };
        let Some(name) = ident.name().filter(|_| ident.kind == TokenKind::Ident) else {
            return Err(ScriptError::invalid_argument(ident));
        };
        let value_key = format!("{}/value", name);
        let cursor_key = format!("{}/cursor", name);

        if entering {
            let collection = self.value(expr)?;
            if collection.iteration_len().is_none() {
                return Err(ScriptError::invalid_argument(format!(
                    "cannot iterate over {}",
                    collection.type_name()
                )));
            }
            self.stack.declare(&value_key, collection);
            self.stack.declare(&cursor_key, Val::Int(0));
        }

        let collection = self.stack.lookup(&value_key).unwrap_or_default();
        let index = self
            .stack
            .lookup(&cursor_key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let Some(item) = usize::try_from(index)
            .ok()
            .and_then(|index| collection.iteration_item(index))
        else {
            return Ok(false);
        };

        self.stack.declare(&cursor_key, Val::Int(index + 1));
        if local {
            self.stack.declare(name, item);
        } else {
            self.assign(name, item);
        }
        Ok(true)
    }

    /* ===================== Break / Continue ===================== */

    /// Leave `levels` breakable contexts (loops only for continue)
    ///
    /// Counts beyond the available nesting are clamped. A `try` between
    /// here and the target records the remainder as pending and is left
    /// through its own closing token.
    pub(crate) fn break_out(&mut self, levels: i64, is_continue: bool) -> Result<Step, ScriptError> {
        let chain = self.stack.chain_indices();
        let contexts = self.stack.contexts();
        let targets: Vec<usize> = chain
            .iter()
            .copied()
            .filter(|i| {
                let kind = &contexts[*i].kind;
                if is_continue {
                    matches!(kind, ContextKind::Loop { .. })
                } else {
                    kind.is_breakable()
                }
            })
            .collect();
        if targets.is_empty() {
            let keyword = if is_continue { "continue" } else { "break" };
            return Err(ScriptError::user(format!("'{}' outside of a loop", keyword)));
        }

        let levels = usize::try_from(levels)
            .unwrap_or(usize::MAX)
            .min(targets.len());
        let target = targets[levels - 1];
        let enclosing_try = chain
            .iter()
            .copied()
            .take_while(|i| *i > target)
            .find(|i| matches!(contexts[*i].kind, ContextKind::Try { .. }));

        if let Some(try_index) = enclosing_try {
            let inside = targets.iter().filter(|i| **i > try_index).count();
            let remaining = (levels - inside) as i64;
            let pending = if is_continue {
                Pending::Continue(remaining)
            } else {
                Pending::Break(remaining)
            };
            return self.defer_to_try(try_index, pending);
        }

        let (end, opener) = match &contexts[target].kind {
            ContextKind::Loop { end } | ContextKind::Switch { end, .. } => {
                (*end, contexts[target].opener)
            }
            _ => return Err(ScriptError::compile(0, "break target is not breakable")),
        };

        if is_continue {
            while self.stack.depth() > target + 1 {
                self.stack.pop(true);
            }
            let Some(opener) = opener else {
                return Err(ScriptError::compile(end, "loop without opener"));
            };
            if let Some(top) = self.stack.top_mut() {
                top.cursor.reentry = true;
            }
            return Ok(Step::Jump(opener));
        }

        while self.stack.depth() > target {
            self.stack.pop(true);
        }
        Ok(Step::Jump(end + 1))
    }

    /// Unwind to the try at `try_index` and leave it through its closing token
    fn defer_to_try(&mut self, try_index: usize, pending: Pending) -> Result<Step, ScriptError> {
        self.stack.unwind_to(try_index + 1);
        match self.stack.top_mut().map(|top| &mut top.kind) {
            Some(ContextKind::Try {
                end,
                pending: slot,
            }) => {
                *slot = Some(pending);
                Ok(Step::Jump(*end))
            }
            _ => Err(ScriptError::compile(0, "pending control without try")),
        }
    }

    /* ===================== Try ===================== */

    fn try_end(&mut self, pc: usize, program: &Arc<Program>) -> Result<Step, ScriptError> {
        let pending = match self.stack.top_mut().map(|top| &mut top.kind) {
            Some(ContextKind::Try { pending, .. }) => pending.take(),
            _ => return Err(ScriptError::compile(pc, "end try without try")),
        };
        self.stack.pop(true);

        let catch = program
            .statement(pc + 1)
            .filter(|st| *st.kind() == TokenKind::Catch)
            .map(|st| (pc + 1, st));

        match pending {
            Some(Pending::Error(message)) => {
                let Some((at, catch)) = catch else {
                    tracing::debug!(error = %message, "error swallowed by try");
                    return Ok(Step::Next);
                };
                let end = target(catch.head(), at)?;
                if let Some(var) = catch.head().name() {
                    self.assign(var, Val::Str(message));
                }
                self.stack.push(ContextKind::Catch { end }, None)?;
                Ok(Step::Jump(at + 1))
            }
            Some(Pending::Break(levels)) => self.break_out(levels, false),
            Some(Pending::Continue(levels)) => self.break_out(levels, true),
            Some(Pending::Return(value)) => self.return_value(value),
            None => match catch {
                Some((at, catch)) => Ok(Step::Jump(target(catch.head(), at)? + 1)),
                None => Ok(Step::Next),
            },
        }
    }

    /* ===================== Functions ===================== */

    /// Push a function context with its arguments bound by position
    pub(crate) fn enter_function(&mut self, name: &str, args: Vec<Val>) -> Result<(), ScriptError> {
        let def = self
            .engine
            .function(name)
            .ok_or_else(|| ScriptError::user(format!("function not found: {}", name)))?;

        let mut scope: HashMap<String, Val> = def
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| (param.clone(), args.get(i).cloned().unwrap_or_default()))
            .collect();
        scope.insert(ARGUMENTS.to_string(), Val::List(args));
        scope.insert(RETVAL.to_string(), Val::Null);

        let group = def.parallel.then(ProcessGroup::default);
        self.stack.push_program(
            ContextKind::Function {
                name: def.name.clone(),
                group,
            },
            def.body.clone(),
            Some(scope),
        )?;
        Ok(())
    }

    /// Store the value in the owner's `_retval` and end its program
    pub(crate) fn return_value(&mut self, value: Val) -> Result<Step, ScriptError> {
        let chain = self.stack.chain_indices();
        let contexts = self.stack.contexts();
        let Some(&owner) = chain.last() else {
            return Err(ScriptError::compile(0, "return without program"));
        };
        let enclosing_try = chain
            .iter()
            .copied()
            .find(|i| matches!(contexts[*i].kind, ContextKind::Try { .. }));

        if let Some(try_index) = enclosing_try {
            return self.defer_to_try(try_index, Pending::Return(value));
        }

        self.stack.unwind_to(owner + 1);
        let Some(top) = self.stack.top_mut() else {
            return Err(ScriptError::compile(0, "return without program"));
        };
        if let Some(vars) = top.vars.as_mut() {
            vars.insert(RETVAL.to_string(), value);
        }
        Ok(Step::Jump(top.cursor.pc_end))
    }
}
