//! Engine
//!
//! The [`Engine`] is the host-facing entry point. Each `run` or `resume`
//! builds a [`Run`] that owns the context stack for the duration of one
//! dispatch; when a run suspends, the stack moves into the returned
//! [`SuspendedExecution`] and the engine keeps nothing about it.

use super::context::{ContextFlags, ContextKind};
use super::errors::{ErrorReport, ScriptError};
use super::evaluator::BasicEvaluator;
use super::host::{CommandHost, Evaluator, ScriptScope};
use super::stack::ContextStack;
use super::types::{FunctionDef, LoopExit, Program, SuspendReason, Token, Val};
use crate::config::{Config, SchedulingMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ===================== Outcome ===================== */

/// Result of `run` or `resume`
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Finished; carries the top-level `return` value
    Completed(Val),
    /// Waiting; hand the execution back to [`Engine::resume`] when ready
    Suspended(SuspendedExecution),
    Error(ErrorReport),
    /// Stopped by [`Engine::request_stop`]
    Stopped,
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed(_))
    }
}

/// A suspended execution, owned by the host until resumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedExecution {
    pub context: SavedContext,
    pub reason: SuspendReason,
    pub duration: Duration,
}

/// Saved context chain; opaque to hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedContext {
    stack: ContextStack,
    result: Val,
}

impl SavedContext {
    /// Number of contexts in the saved chain
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Source line the execution will continue at
    pub fn line(&self) -> Option<u32> {
        self.stack.top().and_then(|ctx| ctx.line())
    }
}

/* ===================== Execution Control ===================== */

#[derive(Debug, Default)]
struct ControlState {
    stopped: bool,
    paused: bool,
    stepping: bool,
    /// Dispatches currently inside `execute`
    active: usize,
}

/// Stop/pause/step flags shared with the host
#[derive(Debug, Default)]
pub(crate) struct ExecutionControl {
    state: Mutex<ControlState>,
    signal: Condvar,
}

/// Marks a run as in flight until dropped
pub(crate) struct ActiveRun<'a>(&'a ExecutionControl);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.0.state);
        state.active = state.active.saturating_sub(1);
    }
}

impl ExecutionControl {
    /// Clear flags left by finished runs; a run still in flight keeps them
    fn reset_if_idle(&self) {
        let mut state = lock(&self.state);
        if state.active > 0 {
            tracing::debug!(active = state.active, "run in flight, control flags kept");
            return;
        }
        state.stopped = false;
        state.paused = false;
        state.stepping = false;
        self.signal.notify_all();
    }

    pub(crate) fn enter(&self) -> ActiveRun<'_> {
        lock(&self.state).active += 1;
        ActiveRun(self)
    }

    fn request_stop(&self) {
        lock(&self.state).stopped = true;
        self.signal.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    pub(crate) fn pause(&self) {
        lock(&self.state).paused = true;
    }

    pub(crate) fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    fn step(&self) {
        let mut state = lock(&self.state);
        state.stepping = true;
        state.paused = false;
        self.signal.notify_all();
    }

    fn resume_paused(&self) {
        let mut state = lock(&self.state);
        state.stepping = false;
        state.paused = false;
        self.signal.notify_all();
    }

    /// In step mode, pause before the next visible statement
    pub(crate) fn after_statement(&self, next_visible: bool) {
        let mut state = lock(&self.state);
        if state.stepping && next_visible {
            state.paused = true;
        }
    }

    /// Block while paused; true if stopped meanwhile
    pub(crate) fn wait_while_paused(&self) -> bool {
        let state = lock(&self.state);
        let state = self
            .signal
            .wait_while(state, |s| s.paused && !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.stopped
    }

    /// Sleep unless stopped first; true if stopped
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .signal
            .wait_timeout_while(state, duration, |s| !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.stopped
    }
}

/* ===================== Shared State ===================== */

/// State visible to every run of an engine, including parallel members
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub globals: Mutex<HashMap<String, Val>>,
    pub functions: RwLock<HashMap<String, Arc<FunctionDef>>>,
    /// Per-name locks of parallel group members
    pub process_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/* ===================== Engine ===================== */

/// Clones share globals, functions, process locks and the stop/pause flags,
/// so a stop or pause reaches every run of the engine that is in flight.
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) host: Arc<dyn CommandHost>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) control: Arc<ExecutionControl>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine with the reference evaluator
    pub fn new(config: Config, host: Arc<dyn CommandHost>) -> Self {
        Self::with_evaluator(config, host, Arc::new(BasicEvaluator))
    }

    pub fn with_evaluator(
        config: Config,
        host: Arc<dyn CommandHost>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            config,
            evaluator,
            host,
            shared: Arc::new(Shared::default()),
            control: Arc::new(ExecutionControl::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> SchedulingMode {
        self.config.engine.mode
    }

    /// Run a program from its first statement
    pub fn run(&self, program: Arc<Program>) -> ExecutionOutcome {
        self.start(program, None)
    }

    /// Run only statements whose lines fall in `first..=last`
    pub fn run_lines(
        &self,
        program: Arc<Program>,
        first: u32,
        last: u32,
    ) -> ExecutionOutcome {
        self.start(program, Some((first, last)))
    }

    fn start(&self, program: Arc<Program>, lines: Option<(u32, u32)>) -> ExecutionOutcome {
        self.control.reset_if_idle();
        let mut run = Run::new(self, ContextStack::new(self.config.engine.max_depth, self.flags()));

        if let Err(err) = run.stack.push_program(ContextKind::Root, program, None) {
            return ExecutionOutcome::Error(run.report(err));
        }
        if let (Some((first, last)), Some(top)) = (lines, run.stack.top_mut()) {
            top.cursor.pc = top.program.first_index_at_line(first);
            top.cursor.line_end = Some(last);
        }

        tracing::info!(program = %run.program_name(), "script started");
        run.execute()
    }

    /// Continue a suspended execution at the statement after the suspension point
    pub fn resume(&self, suspended: SuspendedExecution) -> ExecutionOutcome {
        let SavedContext { mut stack, result } = suspended.context;
        if !stack.is_resumable() {
            return ExecutionOutcome::Error(ErrorReport::from_error(ScriptError::user(
                "nothing to resume",
            )));
        }
        stack.clear_must_resume();

        let mut run = Run::new(self, stack);
        run.result = result;
        run.last_check = Some(Instant::now());

        tracing::info!(
            program = %run.program_name(),
            depth = run.stack.depth(),
            reason = %suspended.reason,
            "script resumed"
        );
        run.execute()
    }

    /// Ask every dispatch loop of this engine to stop
    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    /// Run until the next visible statement, then pause again
    pub fn step(&self) {
        self.control.step();
    }

    pub fn resume_paused(&self) {
        self.control.resume_paused();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn global(&self, name: &str) -> Option<Val> {
        lock(&self.shared.globals).get(name).cloned()
    }

    pub fn set_global(&self, name: &str, value: Val) {
        lock(&self.shared.globals).insert(name.to_string(), value);
    }

    pub fn globals(&self) -> HashMap<String, Val> {
        lock(&self.shared.globals).clone()
    }

    pub fn function(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.shared
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn register_function(&self, def: FunctionDef) {
        tracing::debug!(function = %def.name, "function registered");
        self.shared
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def.name.clone(), Arc::new(def));
    }

    pub(crate) fn flags(&self) -> ContextFlags {
        ContextFlags {
            cooperative: self.config.engine.mode == SchedulingMode::Cooperative,
            quiet: self.config.engine.quiet,
            history: self.config.engine.history,
        }
    }
}

/* ===================== Run ===================== */

/// One activation of the dispatch loop over a context stack
pub(crate) struct Run<'e> {
    pub engine: &'e Engine,
    pub stack: ContextStack,
    /// `_retval` of the most recently finished function
    pub last_return: Val,
    /// `_retval` of the root program
    pub result: Val,
    /// Last cooperative time-slice check
    pub last_check: Option<Instant>,
}

impl<'e> Run<'e> {
    pub fn new(engine: &'e Engine, stack: ContextStack) -> Self {
        Self {
            engine,
            stack,
            last_return: Val::Null,
            result: Val::Null,
            last_check: None,
        }
    }

    fn program_name(&self) -> String {
        self.stack
            .get(0)
            .map(|ctx| ctx.program.name().to_string())
            .unwrap_or_default()
    }

    /// Top-level dispatch, turning the loop exit into an outcome
    pub fn execute(mut self) -> ExecutionOutcome {
        let engine = self.engine;
        let _active = engine.control.enter();
        match self.dispatch(0, true) {
            Ok(LoopExit::Finished) => {
                tracing::info!(result = %self.result, "script completed");
                if !self.engine.config.engine.quiet {
                    self.engine.host.report("Script completed");
                }
                ExecutionOutcome::Completed(self.result)
            }
            Ok(LoopExit::Suspended(wait)) => {
                self.stack.mark_must_resume();
                tracing::info!(
                    reason = %wait.reason,
                    duration_ms = wait.duration.as_millis() as u64,
                    depth = self.stack.depth(),
                    "script suspended"
                );
                ExecutionOutcome::Suspended(SuspendedExecution {
                    context: SavedContext {
                        stack: self.stack,
                        result: self.result,
                    },
                    reason: wait.reason,
                    duration: wait.duration,
                })
            }
            Ok(LoopExit::Stopped) | Err(ScriptError::StopRequested) => {
                tracing::info!(depth = self.stack.depth(), "script stopped");
                self.stack.clear();
                ExecutionOutcome::Stopped
            }
            Err(err) => {
                let report = self.report(err);
                tracing::error!(
                    code = report.code(),
                    line = ?report.line,
                    "{}",
                    report.message
                );
                self.stack.clear();
                ExecutionOutcome::Error(report)
            }
        }
    }

    /// Error report for the current statement, with the context trace
    pub fn report(&self, error: ScriptError) -> ErrorReport {
        let Some(top) = self.stack.top() else {
            return ErrorReport::from_error(error);
        };
        ErrorReport {
            message: format!("{}\n{}", error, self.stack.trace()),
            untranslated: error.untranslated(),
            line: top.line(),
            pc: Some(top.cursor.pc),
            statement: top.statement_text(),
            error,
        }
    }

    pub fn cooperative(&self) -> bool {
        self.stack
            .top()
            .map(|ctx| ctx.flags.cooperative)
            .unwrap_or(false)
    }

    /// Evaluate with the engine's evaluator against this run's scope
    pub fn value(&mut self, tokens: &[Token]) -> Result<Val, ScriptError> {
        let engine = self.engine;
        engine.evaluator.evaluate_value(tokens, self)
    }

    pub fn condition(&mut self, tokens: &[Token]) -> Result<bool, ScriptError> {
        let engine = self.engine;
        engine.evaluator.evaluate_condition(tokens, self)
    }

    pub fn list(&mut self, tokens: &[Token]) -> Result<Vec<Val>, ScriptError> {
        let engine = self.engine;
        engine.evaluator.evaluate_list(tokens, self)
    }

    pub fn check_stop(&self) -> Result<(), ScriptError> {
        if self.engine.control.is_stopped() {
            return Err(ScriptError::StopRequested);
        }
        Ok(())
    }
}

impl ScriptScope for Run<'_> {
    fn lookup(&self, name: &str) -> Option<Val> {
        self.stack
            .lookup(name)
            .or_else(|| self.engine.global(name))
    }

    fn assign(&mut self, name: &str, value: Val) {
        if !self.stack.assign(name, value.clone()) {
            self.engine.set_global(name, value);
        }
    }

    fn call_function(&mut self, name: &str, args: Vec<Val>) -> Result<Val, ScriptError> {
        self.call_nested(name, args)
    }

    fn evaluate(&mut self, tokens: &[Token]) -> Result<Val, ScriptError> {
        self.value(tokens)
    }
}
