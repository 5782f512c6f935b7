//! Execution contexts
//!
//! An [`ExecutionContext`] is the unit of suspend/resume: everything needed
//! to continue one lexical scope at one statement. Contexts live in the
//! [`ContextStack`](super::stack::ContextStack) arena and link to their
//! parent by index, so a whole chain serializes as plain data.

use super::parallel::{ProcessCollector, ProcessGroup};
use super::types::{Pending, Program, Val};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Function result slot in a program owner's scope
pub const RETVAL: &str = "_retval";
/// All call arguments as a list
pub const ARGUMENTS: &str = "_arguments";
/// Global holding the value of the last `throw`
pub const THROWN_VALUE: &str = "thrown_value";

/// Handle of a context in the stack arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub usize);

/* ===================== Context Kind ===================== */

/// Why a context was pushed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ContextKind {
    /// Top-level script
    Root,

    /// User function invocation; `group` is present for parallel functions
    Function {
        name: String,
        group: Option<ProcessGroup>,
    },

    /// Nested script started by a host command
    Script { name: String },

    /// `while` or `for`; `end` is the closing statement
    Loop { end: usize },

    /// `switch`; the scrutinee is consumed by the first matching case
    Switch { end: usize, scrutinee: Option<Val> },

    Try {
        end: usize,
        pending: Option<Pending>,
    },

    Catch { end: usize },

    /// `process` block run inline outside a parallel function
    Process { name: String, end: usize },

    /// Root of a parallel group member
    Member { name: String },

    /// Collecting a `process` block inside a parallel function
    Collect(ProcessCollector),
}

impl ContextKind {
    /// Kinds that get their own variable scope
    pub fn has_fresh_scope(&self) -> bool {
        !matches!(self, ContextKind::Switch { .. } | ContextKind::Collect(_))
    }

    /// Kinds that run their own program from statement 0
    pub fn owns_program(&self) -> bool {
        matches!(
            self,
            ContextKind::Root
                | ContextKind::Function { .. }
                | ContextKind::Script { .. }
                | ContextKind::Member { .. }
        )
    }

    /// Targets of `break`
    pub fn is_breakable(&self) -> bool {
        matches!(self, ContextKind::Loop { .. } | ContextKind::Switch { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::Root => "script",
            ContextKind::Function { .. } => "function",
            ContextKind::Script { .. } => "script",
            ContextKind::Loop { .. } => "loop",
            ContextKind::Switch { .. } => "switch",
            ContextKind::Try { .. } => "try",
            ContextKind::Catch { .. } => "catch",
            ContextKind::Process { .. } => "process",
            ContextKind::Member { .. } => "process",
            ContextKind::Collect(_) => "parallel",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Function { name, .. }
            | ContextKind::Script { name }
            | ContextKind::Process { name, .. }
            | ContextKind::Member { name } => write!(f, "{} {}", self.label(), name),
            ContextKind::Collect(collector) => write!(f, "parallel {}", collector.name),
            other => f.write_str(other.label()),
        }
    }
}

/* ===================== Cursor ===================== */

/// Statement-level position inside a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub pc: usize,
    /// One past the last statement to run
    pub pc_end: usize,
    /// Stop before any statement whose line exceeds this
    pub line_end: Option<u32>,
    /// Token count of the statement at `pc`
    pub statement_len: usize,
    /// Set by a loop's closing token so the opener does not push again
    pub reentry: bool,
}

impl Cursor {
    pub fn new(pc_end: usize) -> Self {
        Self {
            pc: 0,
            pc_end,
            line_end: None,
            statement_len: 0,
            reentry: false,
        }
    }
}

/// Scheduling flags carried by every context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextFlags {
    pub cooperative: bool,
    pub quiet: bool,
    pub history: bool,
}

/* ===================== Execution Context ===================== */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: ContextId,
    /// Enclosing context; never owned by the child
    pub parent: Option<ContextId>,
    pub kind: ContextKind,
    pub program: Arc<Program>,
    pub cursor: Cursor,
    /// Statement in `program` that opened this context
    pub opener: Option<usize>,
    /// Own variable scope; `None` inherits the parent's
    pub vars: Option<HashMap<String, Val>>,
    /// If-chain branches already taken, by statement index; program owners only
    pub marks: Option<BTreeSet<usize>>,
    pub must_resume: bool,
    pub flags: ContextFlags,
}

impl ExecutionContext {
    /// Source line of the current statement
    pub fn line(&self) -> Option<u32> {
        self.program.line_of(self.cursor.pc)
    }

    /// Current statement rendered for traces
    pub fn statement_text(&self) -> Option<String> {
        self.program
            .statement(self.cursor.pc)
            .map(|statement| statement.to_string())
    }
}
