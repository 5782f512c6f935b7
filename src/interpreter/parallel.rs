//! Parallel process groups
//!
//! Inside a function declared `parallel`, each `process name ... end process`
//! block is collected instead of executed. When the function's program ends,
//! the collected members run as independent programs, each under a lock
//! named after the member so two members sharing a name never overlap.
//!
//! ## Function Organization
//! 1. Group types (ProcessCollector, ProcessGroup, ProcessMember)
//! 2. process_block() / collect() - building the group during dispatch
//! 3. Engine::run_process_group() - running the members

use super::context::{ContextFlags, ContextKind};
use super::engine::{lock, Engine, Run};
use super::errors::ScriptError;
use super::stack::ContextStack;
use super::types::{LoopExit, Program, Statement, Step, Val};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Instant;

/* ===================== Group Types ===================== */

/// A `process` block being collected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCollector {
    pub name: String,
    /// The `process` statement
    pub start: usize,
    /// Its `end process`
    pub end: usize,
    pub statements: Vec<Statement>,
    pub lines: Vec<u32>,
}

impl ProcessCollector {
    pub fn new(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            statements: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Turn the collected body into a standalone program
    fn into_member(self, program: &Program) -> Result<ProcessMember, ScriptError> {
        let body = Program::rebased(
            self.name.clone(),
            self.statements,
            self.lines,
            self.start + 1,
            program.functions().to_vec(),
        )?;
        Ok(ProcessMember {
            name: self.name,
            program: Arc::new(body),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub members: Vec<ProcessMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMember {
    pub name: String,
    pub program: Arc<Program>,
}

/// Members still running; the caller waits for zero
struct PendingCount {
    count: Mutex<usize>,
    zero: Condvar,
}

impl PendingCount {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    fn done(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn wait(&self) {
        let count = lock(&self.count);
        drop(
            self.zero
                .wait_while(count, |count| *count > 0)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
    }
}

/// Counts a member as done even if it panics
struct MemberDone<'a>(&'a PendingCount);

impl Drop for MemberDone<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/* ===================== Collection ===================== */

impl Run<'_> {
    /// `process [name]`: collect inside a parallel function, else run inline
    pub(crate) fn process_block(
        &mut self,
        pc: usize,
        statement: &Statement,
    ) -> Result<Step, ScriptError> {
        let head = statement.head();
        let end = head
            .jump
            .ok_or_else(|| ScriptError::compile(pc, "process without end process"))?;
        let name = head
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("p{}", pc));

        let collecting = self
            .stack
            .owner_index()
            .and_then(|owner| self.stack.get(owner))
            .is_some_and(|owner| {
                matches!(
                    owner.kind,
                    ContextKind::Function {
                        group: Some(_),
                        ..
                    }
                )
            });

        let kind = if collecting {
            ContextKind::Collect(ProcessCollector::new(name, pc, end))
        } else {
            ContextKind::Process { name, end }
        };
        self.stack.push(kind, None)?;
        Ok(Step::Next)
    }

    /// Record one statement of the block being collected
    pub(crate) fn collect(
        &mut self,
        pc: usize,
        statement: &Statement,
        program: &Arc<Program>,
    ) -> Result<Step, ScriptError> {
        let Some(ContextKind::Collect(collector)) = self.stack.top_mut().map(|top| &mut top.kind)
        else {
            return Err(ScriptError::compile(pc, "not collecting a process block"));
        };
        if pc < collector.end {
            collector.statements.push(statement.clone());
            collector.lines.push(program.line_of(pc).unwrap_or_default());
            return Ok(Step::Next);
        }

        let Some(ContextKind::Collect(collector)) = self.stack.pop(true).map(|ctx| ctx.kind) else {
            return Err(ScriptError::compile(pc, "not collecting a process block"));
        };
        let member = collector.into_member(program)?;
        tracing::debug!(process = %member.name, statements = member.program.len(), "process collected");

        let owner = self.stack.owner_index();
        match owner
            .and_then(|owner| self.stack.get_mut(owner))
            .map(|ctx| &mut ctx.kind)
        {
            Some(ContextKind::Function {
                group: Some(group),
                ..
            }) => {
                group.members.push(member);
                Ok(Step::Next)
            }
            _ => Err(ScriptError::compile(pc, "process block outside parallel function")),
        }
    }
}

/* ===================== Running a Group ===================== */

impl Engine {
    /// Run every member and return once all have finished
    ///
    /// Members start with a copy of the parallel function's locals. Member
    /// failures are logged and never abort siblings.
    pub(crate) fn run_process_group(
        &self,
        group: ProcessGroup,
        flags: ContextFlags,
        locals: &HashMap<String, Val>,
    ) {
        if group.members.is_empty() {
            return;
        }
        let concurrent = self.config.parallel.concurrent && !flags.cooperative;
        let pending = PendingCount::new(group.members.len());
        tracing::debug!(
            members = group.members.len(),
            concurrent,
            "process group started"
        );

        if concurrent {
            std::thread::scope(|scope| {
                for member in &group.members {
                    let pending = &pending;
                    scope.spawn(move || {
                        let _done = MemberDone(pending);
                        self.run_member(member, flags, locals);
                    });
                }
                pending.wait();
            });
        } else {
            for member in &group.members {
                let _done = MemberDone(&pending);
                self.run_member(member, flags, locals);
            }
            pending.wait();
        }

        tracing::debug!(members = group.members.len(), "process group finished");
    }

    fn run_member(&self, member: &ProcessMember, flags: ContextFlags, locals: &HashMap<String, Val>) {
        let name_lock = self.process_lock(&member.name);
        if let Some(guard) = self.acquire(&name_lock, &member.name) {
            self.run_locked(member, flags, locals);
            drop(guard);
        }
        self.release_process_lock(&member.name, name_lock);
    }

    fn run_locked(&self, member: &ProcessMember, flags: ContextFlags, locals: &HashMap<String, Val>) {
        let mut run = Run::new(self, ContextStack::new(self.config.engine.max_depth, flags));
        let kind = ContextKind::Member {
            name: member.name.clone(),
        };
        if let Err(err) = run
            .stack
            .push_program(kind, member.program.clone(), Some(locals.clone()))
        {
            tracing::warn!(process = %member.name, error = %err, "process failed to start");
            return;
        }

        match run.dispatch(0, false) {
            Ok(LoopExit::Finished) => {
                tracing::debug!(process = %member.name, "process finished");
            }
            Ok(LoopExit::Stopped) | Err(ScriptError::StopRequested) => {
                tracing::debug!(process = %member.name, "process stopped");
            }
            Ok(LoopExit::Suspended(wait)) => {
                tracing::warn!(process = %member.name, reason = %wait.reason, "process cannot suspend");
            }
            Err(err) => {
                let report = run.report(err);
                tracing::warn!(
                    process = %member.name,
                    code = report.code(),
                    line = ?report.line,
                    "{}",
                    report.message
                );
            }
        }
    }

    /// Lock shared by every member with this name, created on first use
    fn process_lock(&self, name: &str) -> Arc<Mutex<()>> {
        lock(&self.shared.process_locks)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Drop the name's entry once no other member holds or waits for it
    fn release_process_lock(&self, name: &str, name_lock: Arc<Mutex<()>>) {
        let mut locks = lock(&self.shared.process_locks);
        let unused = locks
            .get(name)
            .is_some_and(|entry| Arc::ptr_eq(entry, &name_lock))
            && Arc::strong_count(&name_lock) == 2;
        if unused {
            locks.remove(name);
        }
    }

    /// Poll for the name lock until the configured bound or a stop
    fn acquire<'l>(&self, name_lock: &'l Mutex<()>, name: &str) -> Option<MutexGuard<'l, ()>> {
        let deadline = Instant::now() + self.config.parallel.lock_wait();
        loop {
            match name_lock.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                tracing::warn!(process = %name, "timed out waiting for process lock");
                return None;
            }
            if self.control.sleep(self.config.parallel.lock_poll()) {
                return None;
            }
        }
    }
}
