//! Host schedulers
//!
//! The engine is synchronous. A cooperative host drives it on the current
//! task and sleeps between a suspension and the matching resume; a blocking
//! host moves the whole run onto tokio's blocking pool.

use crate::interpreter::{Engine, ExecutionOutcome, Program};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Run a program, resuming every suspension after its requested wait
pub async fn run_to_completion(engine: &Engine, program: Arc<Program>) -> ExecutionOutcome {
    drive(engine, engine.run(program)).await
}

/// Keep resuming `outcome` until it is not a timed suspension
///
/// A context parked by `throw context` is returned to the caller, which
/// decides when to resume it.
pub async fn drive(engine: &Engine, mut outcome: ExecutionOutcome) -> ExecutionOutcome {
    let mut resumes = 0u64;
    while let ExecutionOutcome::Suspended(suspended) = outcome {
        if !suspended.reason.is_timed() {
            tracing::debug!(reason = %suspended.reason, resumes, "left for the host");
            return ExecutionOutcome::Suspended(suspended);
        }
        tracing::debug!(
            reason = %suspended.reason,
            duration_ms = suspended.duration.as_millis() as u64,
            line = ?suspended.context.line(),
            "waiting before resume"
        );
        if suspended.duration.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(suspended.duration).await;
        }
        resumes += 1;
        outcome = engine.resume(suspended);
    }
    tracing::debug!(resumes, "run finished");
    outcome
}

/// Run a blocking-mode program on a dedicated worker
pub fn spawn_blocking_run(engine: Engine, program: Arc<Program>) -> JoinHandle<ExecutionOutcome> {
    tokio::task::spawn_blocking(move || engine.run(program))
}
