//! Engine error types
//!
//! [`ScriptError`] covers everything that can stop a statement from
//! completing. Only `UserScript` and `Thrown` are catchable by `try`; the
//! others always unwind the whole execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/* ===================== Error Codes ===================== */

pub const COMPILE_REFERENCE: &str = "CompileReferenceError";
pub const DEPTH_EXCEEDED: &str = "DepthExceeded";
pub const USER_SCRIPT: &str = "UserScriptError";
pub const THROWN: &str = "ThrownError";
pub const STOP_REQUESTED: &str = "StopRequested";

/* ===================== Script Errors ===================== */

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ScriptError {
    /// Unresolved or inconsistent jump target; the program cannot be trusted
    #[error("unresolved flow target at statement {index}: {message}")]
    CompileReference { index: usize, message: String },

    #[error("too many script levels (maximum {max})")]
    DepthExceeded { max: usize },

    /// Raised by a host command or by expression evaluation
    #[error("{message}")]
    UserScript {
        message: String,
        /// Raw message before any decoration, for logging
        untranslated: Option<String>,
    },

    /// Explicit script-level `throw`
    #[error("{message}")]
    Thrown { message: String },

    #[error("execution interrupted")]
    StopRequested,
}

impl ScriptError {
    pub fn user(message: impl Into<String>) -> Self {
        ScriptError::UserScript {
            message: message.into(),
            untranslated: None,
        }
    }

    pub fn compile(index: usize, message: impl Into<String>) -> Self {
        ScriptError::CompileReference {
            index,
            message: message.into(),
        }
    }

    pub fn invalid_argument(what: impl std::fmt::Display) -> Self {
        ScriptError::user(format!("invalid argument: {}", what))
    }

    /// Whether a `try` block may intercept this error
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            ScriptError::UserScript { .. } | ScriptError::Thrown { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ScriptError::CompileReference { .. } => COMPILE_REFERENCE,
            ScriptError::DepthExceeded { .. } => DEPTH_EXCEEDED,
            ScriptError::UserScript { .. } => USER_SCRIPT,
            ScriptError::Thrown { .. } => THROWN,
            ScriptError::StopRequested => STOP_REQUESTED,
        }
    }

    /// Message without decoration
    pub fn untranslated(&self) -> String {
        match self {
            ScriptError::UserScript {
                untranslated: Some(raw),
                ..
            } => raw.clone(),
            other => other.to_string(),
        }
    }
}

/* ===================== Host Command Errors ===================== */

/// Failure reported by a host command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl From<CommandError> for ScriptError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Script(inner) => inner,
            CommandError::UnknownCommand(name) => ScriptError::UserScript {
                message: format!("unrecognized command: {}", name),
                untranslated: Some(name),
            },
            other => ScriptError::user(other.to_string()),
        }
    }
}

/* ===================== Error Report ===================== */

/// What the host receives for an uncaught error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: ScriptError,
    /// Message followed by the context trace
    pub message: String,
    pub untranslated: String,
    pub line: Option<u32>,
    pub pc: Option<usize>,
    pub statement: Option<String>,
}

impl ErrorReport {
    /// Report without statement information
    pub fn from_error(error: ScriptError) -> Self {
        Self {
            message: error.to_string(),
            untranslated: error.untranslated(),
            line: None,
            pc: None,
            statement: None,
            error,
        }
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_user_and_thrown_are_catchable() {
        assert!(ScriptError::user("bad").is_catchable());
        assert!(ScriptError::Thrown {
            message: "x".into()
        }
        .is_catchable());
        assert!(!ScriptError::DepthExceeded { max: 100 }.is_catchable());
        assert!(!ScriptError::compile(3, "missing end").is_catchable());
        assert!(!ScriptError::StopRequested.is_catchable());
    }

    #[test]
    fn test_command_error_conversion() {
        let err: ScriptError = CommandError::UnknownCommand("spin".into()).into();
        assert_eq!(err.code(), USER_SCRIPT);
        assert_eq!(err.untranslated(), "spin");
        assert_eq!(err.to_string(), "unrecognized command: spin");

        let inner = ScriptError::DepthExceeded { max: 4 };
        let err: ScriptError = CommandError::Script(inner.clone()).into();
        assert_eq!(err, inner);
    }
}
