//! Control flow and dispatch outcome types

use super::values::Val;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/* ===================== Pending Control ===================== */

/// Control flow recorded by a `try` scope and resolved at its `end try`
///
/// Break, continue and return raised inside a try body do not unwind past
/// the try directly; the try context records them here and the closing
/// token re-issues them in the enclosing scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Pending {
    Error(String),
    /// Remaining levels to break out of once the try is gone
    Break(i64),
    Continue(i64),
    Return(Val),
}

/* ===================== Suspension ===================== */

/// Why dispatch handed control back to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum SuspendReason {
    /// Timed `delay`
    Delay,
    /// Cooperative time slice expired
    Yield,
    /// Paused or stepping; the host should poll and resume
    Pause,
    /// Host-defined wait, e.g. a file load
    Host(String),
    /// `throw context name`: parked until the host resumes it by name
    Context(String),
}

impl SuspendReason {
    /// Whether a scheduler may resume on its own once the duration passes
    pub fn is_timed(&self) -> bool {
        !matches!(self, SuspendReason::Context(_))
    }
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::Delay => f.write_str("delay"),
            SuspendReason::Yield => f.write_str("yield"),
            SuspendReason::Pause => f.write_str("pause"),
            SuspendReason::Host(reason) => f.write_str(reason),
            SuspendReason::Context(name) => write!(f, "context {}", name),
        }
    }
}

/// A request to wait: sleep in blocking mode, suspend in cooperative mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRequest {
    pub reason: SuspendReason,
    pub duration: Duration,
}

impl WaitRequest {
    pub fn new(reason: SuspendReason, duration: Duration) -> Self {
        Self { reason, duration }
    }
}

/* ===================== Step ===================== */

/// Result of executing one statement
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Advance to the next statement
    Next,
    /// Continue at the given statement of the current top context
    Jump(usize),
    /// A new program-owning context was pushed; its own cursor is current
    Entered,
    /// Advance, then wait
    Wait(WaitRequest),
    /// End the run as if stopped
    Exit,
}

/// Why a dispatch loop returned
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Finished,
    Suspended(WaitRequest),
    Stopped,
}
