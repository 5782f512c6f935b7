//! # Script execution engine
//!
//! Runs pre-tokenized programs against a host application. All execution
//! state lives in a [`ContextStack`](stack::ContextStack) so a running script
//! can be suspended at any statement and resumed later, possibly after the
//! saved chain went through serde.
//!
//! ## Core Principles
//!
//! 1. **Flat dispatch**: one loop per run; scopes are contexts, not native frames
//! 2. **Statement-level cursor**: the top context's pc is the only live position
//! 3. **Centralized flow control**: break/continue/return/throw unwind the stack in one place
//! 4. **Injected collaborators**: expressions and host commands come from traits

pub mod assembler;
pub mod context;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod exec_loop;
pub mod flow;
pub mod host;
pub mod parallel;
pub mod stack;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

// Re-export commonly used items
pub use assembler::{Assembler, SourceFunction, SourceProgram, SourceStatement};
pub use context::{ContextFlags, ContextKind, ExecutionContext};
pub use engine::{Engine, ExecutionOutcome, SavedContext, SuspendedExecution};
pub use errors::{CommandError, ErrorReport, ScriptError};
pub use evaluator::BasicEvaluator;
pub use host::{CommandEffect, CommandHost, Evaluator, ScriptScope};
pub use parallel::{ProcessGroup, ProcessMember};
pub use stack::ContextStack;
pub use types::{
    Block, FunctionDef, Op, Program, Statement, SuspendReason, Token, TokenKind, Val,
};
