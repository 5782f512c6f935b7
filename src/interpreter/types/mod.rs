//! Type definitions for the engine
//!
//! - Program model (Program, Statement, FunctionDef)
//! - Tokens (Token, TokenKind, Block, Op)
//! - Runtime values (Val)
//! - Control flow (Pending, Step, LoopExit, suspension types)

pub mod control;
pub mod program;
pub mod token;
pub mod values;

pub use control::{LoopExit, Pending, Step, SuspendReason, WaitRequest};
pub use program::{FunctionDef, Program, Statement};
pub use token::{Block, Op, Token, TokenKind};
pub use values::Val;
