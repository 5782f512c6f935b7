//! Collaborator traits
//!
//! The engine owns control flow only. Expression evaluation and every
//! non-flow command are injected as capability objects.

use super::errors::{CommandError, ScriptError};
use super::types::token::split_top_level;
use super::types::{Program, Statement, SuspendReason, Token, TokenKind, Val};
use std::sync::Arc;
use std::time::Duration;

/// Variable and function access handed to collaborators during a statement
pub trait ScriptScope {
    /// Local scope chain first, then globals
    fn lookup(&self, name: &str) -> Option<Val>;

    /// Update the nearest binding, or create a global
    fn assign(&mut self, name: &str, value: Val);

    /// Run a user function to completion and return its `_retval`
    fn call_function(&mut self, name: &str, args: Vec<Val>) -> Result<Val, ScriptError>;

    /// Evaluate an expression with the engine's evaluator
    fn evaluate(&mut self, tokens: &[Token]) -> Result<Val, ScriptError>;
}

/// Expression evaluator contract
pub trait Evaluator: Send + Sync {
    fn evaluate_value(&self, tokens: &[Token], scope: &mut dyn ScriptScope)
        -> Result<Val, ScriptError>;

    fn evaluate_condition(
        &self,
        tokens: &[Token],
        scope: &mut dyn ScriptScope,
    ) -> Result<bool, ScriptError> {
        Ok(self.evaluate_value(tokens, scope)?.is_truthy())
    }

    /// Comma-separated values, e.g. call arguments
    fn evaluate_list(
        &self,
        tokens: &[Token],
        scope: &mut dyn ScriptScope,
    ) -> Result<Vec<Val>, ScriptError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        split_top_level(tokens, &TokenKind::Comma)
            .into_iter()
            .map(|part| self.evaluate_value(part, &mut *scope))
            .collect()
    }
}

/// What a host command asks the engine to do next
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEffect {
    Continue,
    /// Sleep in blocking mode, suspend in cooperative mode
    Wait {
        reason: SuspendReason,
        duration: Duration,
    },
    /// Run a nested script in its own scope
    RunScript(Arc<Program>),
}

/// Host command table
pub trait CommandHost: Send + Sync {
    fn dispatch(
        &self,
        command: &str,
        statement: &Statement,
        scope: &mut dyn ScriptScope,
    ) -> Result<CommandEffect, CommandError>;

    /// Offered every executed non-flow statement when history is on
    fn add_history(&self, _statement: &Statement) {}

    /// Status messages such as script completion
    fn report(&self, _message: &str) {}

    /// Called on entering `try`
    fn reset_error(&self) {}
}
