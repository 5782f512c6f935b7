//! Core execution loop
//!
//! `dispatch` advances the top context statement by statement until the
//! stack drops to its floor, a wait suspends it, or a stop is requested.
//! There is no native recursion per scope: loops, try blocks and `call`
//! statements push contexts and keep running in the same loop, so a
//! suspension anywhere captures the whole chain. Only user functions called
//! from inside an expression run a nested, non-resumable dispatch.
//!
//! ## Function Organization
//! 1. dispatch() - the loop itself
//! 2. execute_statement() / apply() - one statement and its effect on the cursor
//! 3. finish_context() / handle_error() - leaving contexts normally or by error
//! 4. built-in statements and host commands

use super::context::{ContextKind, RETVAL};
use super::engine::Run;
use super::errors::ScriptError;
use super::host::{CommandEffect, ScriptScope};
use super::stack::RestoreMode;
use super::types::token::find_top_level;
use super::types::{
    LoopExit, Pending, Program, Statement, Step, SuspendReason, Token, TokenKind, Val,
    WaitRequest,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/* ===================== Dispatch ===================== */

impl Run<'_> {
    /// Run until the stack depth drops to `floor`
    ///
    /// Only a resumable dispatch may suspend; nested dispatches skip
    /// cooperative waits instead.
    pub(crate) fn dispatch(
        &mut self,
        floor: usize,
        resumable: bool,
    ) -> Result<LoopExit, ScriptError> {
        let mut first = true;
        loop {
            if self.engine.control.is_stopped() {
                return Ok(LoopExit::Stopped);
            }
            if self.stack.depth() <= floor {
                return Ok(LoopExit::Finished);
            }

            let cooperative = self.cooperative();
            if cooperative && resumable {
                let now = Instant::now();
                let interval = self.engine.config.engine.yield_interval();
                let expired = !first
                    && self
                        .last_check
                        .is_some_and(|last| now.duration_since(last) > interval);
                self.last_check = Some(now);
                if expired {
                    return Ok(LoopExit::Suspended(WaitRequest::new(
                        SuspendReason::Yield,
                        Duration::ZERO,
                    )));
                }
            }
            first = false;

            if self.engine.control.is_paused() {
                if !cooperative {
                    if self.engine.control.wait_while_paused() {
                        return Ok(LoopExit::Stopped);
                    }
                    continue;
                }
                if resumable {
                    return Ok(LoopExit::Suspended(WaitRequest::new(
                        SuspendReason::Pause,
                        self.engine.config.engine.pause_poll(),
                    )));
                }
            }

            if self.at_end() {
                self.finish_context(floor)?;
                continue;
            }

            let Some((program, pc)) = self
                .stack
                .top()
                .map(|top| (top.program.clone(), top.cursor.pc))
            else {
                return Ok(LoopExit::Finished);
            };
            let Some(statement) = program.statement(pc) else {
                return Err(ScriptError::compile(pc, "statement out of range"));
            };
            if let Some(top) = self.stack.top_mut() {
                top.cursor.statement_len = statement.len();
            }

            let collecting = matches!(
                self.stack.top().map(|top| &top.kind),
                Some(ContextKind::Collect(_))
            );
            let level = self.script_level();
            let result = if collecting {
                self.collect(pc, statement, &program)
            } else {
                self.execute_statement(pc, statement, &program)
            };

            let step = match result {
                Ok(step) => step,
                Err(err) => {
                    self.handle_error(err, floor)?;
                    continue;
                }
            };

            if !collecting {
                self.record_history(statement, level);
            }

            if let Some(exit) = self.apply(step, resumable)? {
                return Ok(exit);
            }

            let next_visible = self
                .stack
                .top()
                .and_then(|top| top.program.statement(top.cursor.pc))
                .is_some_and(|next| next.is_displayable());
            self.engine.control.after_statement(next_visible);
        }
    }

    fn execute_statement(
        &mut self,
        pc: usize,
        statement: &Statement,
        program: &Arc<Program>,
    ) -> Result<Step, ScriptError> {
        let kind = statement.kind();
        if kind.is_flow_control() {
            return self.flow(pc, statement, program);
        }
        match kind {
            TokenKind::Process => self.process_block(pc, statement),
            TokenKind::Set => self.assignment(statement.args(), false),
            TokenKind::Var => self.assignment(statement.args(), true),
            TokenKind::Delay => self.delay(statement.args()),
            TokenKind::Pause => {
                self.engine.control.pause();
                Ok(Step::Next)
            }
            TokenKind::Exit => Ok(Step::Exit),
            TokenKind::Command(name) => self.host_command(name, statement),
            TokenKind::Ident if find_top_level(&statement.tokens, &TokenKind::Assign).is_some() => {
                self.assignment(&statement.tokens, false)
            }
            _ => Err(ScriptError::UserScript {
                message: format!("unrecognized command: {}", statement),
                untranslated: Some(statement.to_string()),
            }),
        }
    }

    /// Move the cursor as the statement asked; may end the loop
    fn apply(&mut self, step: Step, resumable: bool) -> Result<Option<LoopExit>, ScriptError> {
        match step {
            Step::Next => self.advance(),
            Step::Jump(target) => self.jump(target),
            Step::Entered => {}
            Step::Exit => {
                tracing::info!(depth = self.stack.depth(), "script exited");
                return Ok(Some(LoopExit::Stopped));
            }
            Step::Wait(wait) => {
                self.advance();
                // A parked context hands control back in either mode
                if !wait.reason.is_timed() {
                    return Ok(Some(LoopExit::Suspended(wait)));
                }
                if self.cooperative() {
                    if resumable {
                        return Ok(Some(LoopExit::Suspended(wait)));
                    }
                    tracing::debug!(reason = %wait.reason, "wait skipped in nested call");
                } else if self.engine.control.sleep(wait.duration) {
                    return Ok(Some(LoopExit::Stopped));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn advance(&mut self) {
        if let Some(top) = self.stack.top_mut() {
            let pc = top.cursor.pc + 1;
            top.cursor.pc = pc;
            top.cursor.statement_len = top.program.statement(pc).map_or(0, |st| st.len());
        }
    }

    pub(crate) fn jump(&mut self, target: usize) {
        if let Some(top) = self.stack.top_mut() {
            top.cursor.pc = target;
            top.cursor.statement_len = top.program.statement(target).map_or(0, |st| st.len());
        }
    }

    /// Past the last statement or the line bound
    fn at_end(&self) -> bool {
        let Some(top) = self.stack.top() else {
            return true;
        };
        if top.cursor.pc >= top.cursor.pc_end {
            return true;
        }
        matches!(
            (top.cursor.line_end, top.program.line_of(top.cursor.pc)),
            (Some(end), Some(line)) if line > end
        )
    }

    /// Nesting of scripts and functions below the root
    fn script_level(&self) -> usize {
        self.stack
            .contexts()
            .iter()
            .filter(|ctx| ctx.kind.owns_program())
            .count()
            .saturating_sub(1)
    }

    /* ===================== Leaving Contexts ===================== */

    /// Pop a context whose program ran out
    fn finish_context(&mut self, floor: usize) -> Result<(), ScriptError> {
        let Some(top) = self.stack.top() else {
            return Ok(());
        };

        if !top.kind.owns_program() {
            // A line bound can end the run inside a block
            let line_bound = top.cursor.pc < top.cursor.pc_end;
            match self.stack.owner_index() {
                Some(owner) if line_bound => {
                    self.stack.unwind_to(owner + 1);
                    if let Some(owner) = self.stack.top_mut() {
                        owner.cursor.pc = owner.cursor.pc_end;
                    }
                    return Ok(());
                }
                _ => {
                    return Err(ScriptError::compile(
                        top.cursor.pc,
                        format!("'{}' block is not closed", top.kind.label()),
                    ))
                }
            }
        }

        let retval = top
            .vars
            .as_ref()
            .and_then(|vars| vars.get(RETVAL))
            .cloned()
            .unwrap_or_default();

        let group = match self.stack.top_mut().map(|top| &mut top.kind) {
            Some(ContextKind::Function { group, .. }) => group.take(),
            _ => None,
        };
        if let Some(group) = group {
            let (flags, locals) = self
                .stack
                .top()
                .map(|top| (top.flags, top.vars.clone().unwrap_or_default()))
                .unwrap_or_default();
            self.engine.run_process_group(group, flags, &locals);
        }

        let Some(popped) = self.stack.pop(false) else {
            return Ok(());
        };
        match popped.kind {
            ContextKind::Root => self.result = retval,
            ContextKind::Function { .. } => {
                self.last_return = retval;
                if self.stack.depth() > floor {
                    self.advance();
                }
            }
            ContextKind::Script { .. } => {
                if self.stack.depth() > floor {
                    self.advance();
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Route a failed statement to the nearest `try` above `floor`
    fn handle_error(&mut self, err: ScriptError, floor: usize) -> Result<(), ScriptError> {
        if !err.is_catchable() {
            return Err(err);
        }
        let contexts = self.stack.contexts();
        let Some(index) = (floor..contexts.len())
            .rev()
            .find(|i| matches!(contexts[*i].kind, ContextKind::Try { .. }))
        else {
            return Err(err);
        };

        let message = err.to_string();
        tracing::debug!(error = %message, depth = index + 1, "error caught by try");

        self.stack.unwind_to(index + 1);
        self.stack.last_error = Some(message.clone());
        let Some(top) = self.stack.top_mut() else {
            return Err(err);
        };
        let end = match &mut top.kind {
            ContextKind::Try { end, pending } => {
                *pending = Some(Pending::Error(message));
                *end
            }
            _ => return Err(err),
        };
        self.jump(end);
        Ok(())
    }

    /// Run a user function to completion from inside an expression
    pub(crate) fn call_nested(&mut self, name: &str, args: Vec<Val>) -> Result<Val, ScriptError> {
        let snapshot = self.stack.snapshot();
        let floor = self.stack.depth();
        self.enter_function(name, args)?;

        let failure = match self.dispatch(floor, false) {
            Ok(LoopExit::Finished) => return Ok(std::mem::take(&mut self.last_return)),
            Ok(LoopExit::Stopped) => ScriptError::StopRequested,
            Ok(LoopExit::Suspended(_)) => ScriptError::user("cannot wait inside an expression"),
            Err(err) => err,
        };
        self.stack.restore(&snapshot, RestoreMode::POP);
        Err(failure)
    }

    /* ===================== Built-in Statements ===================== */

    /// `set name = expr`, `var name [= expr]`, or a bare `name = expr`
    pub(crate) fn assignment(&mut self, tokens: &[Token], local: bool) -> Result<Step, ScriptError> {
        let name = match tokens.first() {
            Some(token) if token.kind == TokenKind::Ident => {
                token.name().unwrap_or_default().to_string()
            }
            Some(token) => return Err(ScriptError::invalid_argument(token)),
            None => return Err(ScriptError::invalid_argument("missing variable name")),
        };
        let expr = match tokens.get(1) {
            Some(token) if token.kind == TokenKind::Assign => &tokens[2..],
            _ => &tokens[1..],
        };

        let value = if expr.is_empty() {
            if !local {
                return Err(ScriptError::invalid_argument(format!("no value for {}", name)));
            }
            Val::Null
        } else {
            self.value(expr)?
        };

        if local {
            if !self.stack.declare(&name, value.clone()) {
                self.engine.set_global(&name, value);
            }
        } else {
            self.assign(&name, value);
        }
        Ok(Step::Next)
    }

    /// `delay seconds`; zero or negative does nothing
    fn delay(&mut self, args: &[Token]) -> Result<Step, ScriptError> {
        let value = self.value(args)?;
        let Some(seconds) = value.as_f64() else {
            return Err(ScriptError::invalid_argument(value));
        };
        if seconds <= 0.0 || !seconds.is_finite() {
            return Ok(Step::Next);
        }
        let duration =
            Duration::try_from_secs_f64(seconds).map_err(ScriptError::invalid_argument)?;
        Ok(Step::Wait(WaitRequest::new(SuspendReason::Delay, duration)))
    }

    fn host_command(&mut self, name: &str, statement: &Statement) -> Result<Step, ScriptError> {
        let engine = self.engine;
        match engine.host.dispatch(name, statement, self)? {
            CommandEffect::Continue => Ok(Step::Next),
            CommandEffect::Wait { reason, duration } => {
                Ok(Step::Wait(WaitRequest::new(reason, duration)))
            }
            CommandEffect::RunScript(program) => {
                let name = program.name().to_string();
                self.stack
                    .push_program(ContextKind::Script { name }, program, None)?;
                Ok(Step::Entered)
            }
        }
    }

    fn record_history(&self, statement: &Statement, level: usize) {
        let kind = statement.kind();
        if kind.is_flow_control() || *kind == TokenKind::Process {
            return;
        }
        let Some(flags) = self.stack.top().map(|top| top.flags) else {
            return;
        };
        if flags.quiet || !flags.history || level > self.engine.config.engine.history_level {
            return;
        }
        self.engine.host.add_history(statement);
    }
}
