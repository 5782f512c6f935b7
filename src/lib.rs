pub mod cli;
pub mod config;
pub mod interpreter;
pub mod scheduler;

// Re-export main types
pub use config::{Config, SchedulingMode};
pub use interpreter::{
    Assembler, CommandEffect, CommandError, CommandHost, Engine, ErrorReport, ExecutionOutcome,
    Program, ScriptError, ScriptScope, SourceProgram, SuspendedExecution, Val,
};
