//! Context stack
//!
//! The stack is an arena of [`ExecutionContext`]s; the last element is the
//! active context and each context names its parent by index. The live
//! statement cursor always belongs to the top context: flow contexts copy it
//! from their parent when pushed and hand it back when popped.

use super::context::{ContextFlags, ContextId, ContextKind, Cursor, ExecutionContext};
use super::errors::ScriptError;
use super::types::{Program, Val};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/* ===================== Snapshot ===================== */

/// Cursor-level state of the active context, attached to its parent chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub context: Option<ContextId>,
    pub depth: usize,
    pub cursor: Option<Cursor>,
    pub error: Option<String>,
    pub flags: ContextFlags,
    pub must_resume: bool,
}

/// How [`ContextStack::restore`] applies a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreMode {
    /// Drop every context pushed after the snapshot
    pub as_pop: bool,
    /// Keep the current cursor; only restore flags
    pub flow_only: bool,
    /// Restore the cursor and nothing else
    pub statement_only: bool,
}

impl RestoreMode {
    pub const POP: RestoreMode = RestoreMode {
        as_pop: true,
        flow_only: false,
        statement_only: false,
    };

    pub const STATEMENT: RestoreMode = RestoreMode {
        as_pop: false,
        flow_only: false,
        statement_only: true,
    };
}

/* ===================== Context Stack ===================== */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStack {
    contexts: Vec<ExecutionContext>,
    max_depth: usize,
    /// Flags for a root pushed onto an empty stack
    base_flags: ContextFlags,
    /// Message of the last error intercepted by a try
    pub last_error: Option<String>,
}

impl ContextStack {
    pub fn new(max_depth: usize, base_flags: ContextFlags) -> Self {
        Self {
            contexts: Vec::new(),
            max_depth,
            base_flags,
            last_error: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn top(&self) -> Option<&ExecutionContext> {
        self.contexts.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.contexts.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&ExecutionContext> {
        self.contexts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ExecutionContext> {
        self.contexts.get_mut(index)
    }

    pub fn contexts(&self) -> &[ExecutionContext] {
        &self.contexts
    }

    /// Push a flow context running the current top's program at its cursor
    pub fn push(
        &mut self,
        kind: ContextKind,
        bindings: Option<HashMap<String, Val>>,
    ) -> Result<ContextId, ScriptError> {
        let Some(top) = self.contexts.last() else {
            return Err(ScriptError::compile(0, "flow context without enclosing program"));
        };
        let program = top.program.clone();
        let cursor = Cursor {
            reentry: false,
            ..top.cursor.clone()
        };
        let opener = Some(top.cursor.pc);
        self.push_context(kind, program, cursor, opener, bindings)
    }

    /// Push a context that runs `program` from its first statement
    pub fn push_program(
        &mut self,
        kind: ContextKind,
        program: Arc<Program>,
        bindings: Option<HashMap<String, Val>>,
    ) -> Result<ContextId, ScriptError> {
        let cursor = Cursor::new(program.len());
        let opener = self.contexts.last().map(|top| top.cursor.pc);
        self.push_context(kind, program, cursor, opener, bindings)
    }

    fn push_context(
        &mut self,
        kind: ContextKind,
        program: Arc<Program>,
        mut cursor: Cursor,
        opener: Option<usize>,
        bindings: Option<HashMap<String, Val>>,
    ) -> Result<ContextId, ScriptError> {
        if self.contexts.len() >= self.max_depth {
            return Err(ScriptError::DepthExceeded {
                max: self.max_depth,
            });
        }

        let id = ContextId(self.contexts.len());
        let parent = self.contexts.last().map(|top| top.id);
        let flags = self
            .contexts
            .last()
            .map(|top| top.flags)
            .unwrap_or(self.base_flags);
        let vars = if kind.has_fresh_scope() {
            Some(bindings.unwrap_or_default())
        } else {
            None
        };
        let marks = kind.owns_program().then(BTreeSet::new);
        cursor.statement_len = program
            .statement(cursor.pc)
            .map(|statement| statement.len())
            .unwrap_or(0);

        tracing::debug!(
            depth = id.0 + 1,
            kind = %kind,
            pc = cursor.pc,
            "push context"
        );

        self.contexts.push(ExecutionContext {
            id,
            parent,
            kind,
            program,
            cursor,
            opener,
            vars,
            marks,
            must_resume: false,
            flags,
        });
        Ok(id)
    }

    /// Discard the top context
    ///
    /// A flow pop hands the popped cursor back to the new top, so the
    /// enclosing scope continues where the inner one stopped. A general pop
    /// leaves the enclosing cursor at the statement that pushed.
    pub fn pop(&mut self, flow_only: bool) -> Option<ExecutionContext> {
        let snapshot = flow_only.then(|| self.snapshot());
        let popped = self.contexts.pop()?;

        tracing::debug!(
            depth = self.contexts.len(),
            kind = %popped.kind,
            pc = popped.cursor.pc,
            flow_only,
            "pop context"
        );

        if let Some(snapshot) = snapshot {
            self.restore(&snapshot, RestoreMode::STATEMENT);
        }
        Some(popped)
    }

    /// Capture the active cursor and flags
    pub fn snapshot(&self) -> Snapshot {
        let top = self.contexts.last();
        Snapshot {
            context: top.map(|ctx| ctx.id),
            depth: self.contexts.len(),
            cursor: top.map(|ctx| ctx.cursor.clone()),
            error: self.last_error.clone(),
            flags: top.map(|ctx| ctx.flags).unwrap_or(self.base_flags),
            must_resume: top.map(|ctx| ctx.must_resume).unwrap_or(false),
        }
    }

    /// Apply a snapshot to the stack
    pub fn restore(&mut self, snapshot: &Snapshot, mode: RestoreMode) {
        if mode.as_pop {
            self.contexts.truncate(snapshot.depth);
        }

        let Some(top) = self.contexts.last_mut() else {
            return;
        };

        if !mode.flow_only {
            if let Some(cursor) = &snapshot.cursor {
                top.cursor.pc = cursor.pc;
                top.cursor.pc_end = cursor.pc_end;
                top.cursor.line_end = cursor.line_end;
                top.cursor.statement_len = cursor.statement_len;
            }
            if mode.statement_only {
                return;
            }
        }

        top.must_resume = snapshot.must_resume;
        top.flags = snapshot.flags;
        if !mode.as_pop {
            self.last_error = snapshot.error.clone();
        }

        tracing::debug!(
            depth = self.contexts.len(),
            pc = ?snapshot.cursor.as_ref().map(|c| c.pc),
            "restore context"
        );
    }

    /// Drop everything above `depth`
    pub fn unwind_to(&mut self, depth: usize) {
        while self.contexts.len() > depth {
            self.pop(false);
        }
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    /// Mark the whole chain as suspended
    pub fn mark_must_resume(&mut self) {
        for context in &mut self.contexts {
            context.must_resume = true;
        }
    }

    /// Whether every context in the chain was suspended and not yet resumed
    pub fn is_resumable(&self) -> bool {
        !self.contexts.is_empty() && self.contexts.iter().all(|ctx| ctx.must_resume)
    }

    pub fn clear_must_resume(&mut self) {
        for context in &mut self.contexts {
            context.must_resume = false;
        }
    }

    /* ===================== Scope ===================== */

    /// Parent chain from the top, ending at the nearest program owner
    fn scope_chain(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.contexts.last().map(|ctx| ctx.id.0);
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            let index = next?;
            let context = &self.contexts[index];
            done = context.kind.owns_program();
            next = context.parent.map(|parent| parent.0);
            Some(index)
        })
    }

    /// Index of the nearest program-owning context
    pub fn owner_index(&self) -> Option<usize> {
        self.scope_chain()
            .find(|index| self.contexts[*index].kind.owns_program())
    }

    /// Contexts between the top and the owner, innermost first
    pub fn chain_indices(&self) -> Vec<usize> {
        self.scope_chain().collect()
    }

    /// Local lookup; globals are the caller's concern
    pub fn lookup(&self, name: &str) -> Option<Val> {
        self.scope_chain().find_map(|index| {
            self.contexts[index]
                .vars
                .as_ref()
                .and_then(|vars| vars.get(name).cloned())
        })
    }

    /// Update the nearest existing local binding; false if there is none
    pub fn assign(&mut self, name: &str, value: Val) -> bool {
        let found = self.scope_chain().find(|index| {
            self.contexts[*index]
                .vars
                .as_ref()
                .is_some_and(|vars| vars.contains_key(name))
        });
        match found.and_then(|index| self.contexts[index].vars.as_mut()) {
            Some(vars) => {
                vars.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Bind `name` in the nearest context with its own scope
    pub fn declare(&mut self, name: &str, value: Val) -> bool {
        let found = self
            .scope_chain()
            .find(|index| self.contexts[*index].vars.is_some());
        match found.and_then(|index| self.contexts[index].vars.as_mut()) {
            Some(vars) => {
                vars.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Taken if-chain branches of the current program invocation
    pub fn marks_mut(&mut self) -> Option<&mut BTreeSet<usize>> {
        let owner = self.owner_index()?;
        self.contexts[owner].marks.as_mut()
    }

    /* ===================== Trace ===================== */

    /// One line per context, innermost first, following parent links
    pub fn trace(&self) -> String {
        let mut lines = Vec::new();
        let mut next = self.contexts.last().map(|ctx| ctx.id.0);
        while let Some(index) = next {
            let context = &self.contexts[index];
            let line = context
                .line()
                .map(|line| line.to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "  {} [{}] line {}: {}",
                context.kind,
                context.program.name(),
                line,
                context.statement_text().unwrap_or_default()
            ));
            next = context.parent.map(|parent| parent.0);
        }
        lines.join("\n")
    }
}
