//! Status tracking: pure functions over a [`Request`].
//!
//! The tracker validates every transition against the lifecycle table,
//! applies the transition's side effects to an in-memory copy of the
//! record, and computes stage progress percentages. It performs no I/O;
//! strategies call into it around every mutation and persist whatever it
//! produces via the store's conditional update.
//!
//! Lifecycle table:
//!
//! | From        | To          | Trigger                                |
//! |-------------|-------------|----------------------------------------|
//! | Pending     | Processing  | strategy claims the request            |
//! | Pending     | Cancelled   | cancel accepted before claim           |
//! | Processing  | Executing   | executor invocation begins             |
//! | Processing  | Cancelled   | cancel accepted before execution       |
//! | Executing   | Completed   | executor success                       |
//! | Executing   | Failed      | executor failure, no retry remains     |
//! | Executing   | Pending     | executor failure, retry remains (queue)|
//!
//! Anything else (in particular any transition out of a terminal state)
//! is invalid and must leave the record untouched.

use crate::error::OrchestratorError;
use crate::{ErrorEntry, Request, RequestResult, RequestStatus, StatusChange};

/// Check a transition against the lifecycle table.
pub fn validate_transition(
    current: RequestStatus,
    requested: RequestStatus,
) -> Result<(), OrchestratorError> {
    use RequestStatus::*;
    let ok = matches!(
        (current, requested),
        (Pending, Processing)
            | (Pending, Cancelled)
            | (Processing, Executing)
            | (Processing, Cancelled)
            | (Executing, Completed)
            | (Executing, Failed)
            | (Executing, Pending)
    );
    if ok {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidTransition {
            from: current,
            to: requested,
        })
    }
}

fn commit(request: &mut Request, to: RequestStatus, now_ms: u64) {
    request.history.push(StatusChange {
        from: request.status,
        to,
        at_ms: now_ms,
    });
    request.status = to;
}

/// `Pending -> Processing`: the strategy has claimed the request.
/// Sets `started_at_ms` on the first claim only and advances the attempt
/// counter.
pub fn apply_claim(request: &mut Request, now_ms: u64) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Processing)?;
    if request.started_at_ms.is_none() {
        request.started_at_ms = Some(now_ms);
    }
    request.attempt_count += 1;
    commit(request, RequestStatus::Processing, now_ms);
    Ok(())
}

/// `Processing -> Executing`: the executor invocation is about to begin.
/// Resets progress to the attempt floor.
pub fn apply_execution_started(request: &mut Request, now_ms: u64) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Executing)?;
    request.progress.current_stage = "initializing".to_string();
    request.progress.percentage = 0;
    request.progress.updated_at_ms = now_ms;
    commit(request, RequestStatus::Executing, now_ms);
    Ok(())
}

/// `Executing -> Completed`: store the result and stamp completion.
pub fn apply_completed(
    request: &mut Request,
    result: RequestResult,
    now_ms: u64,
) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Completed)?;
    request.result = Some(result);
    request.completed_at_ms = Some(now_ms);
    request.progress.current_stage = "done".to_string();
    request.progress.percentage = 100;
    request.progress.updated_at_ms = now_ms;
    commit(request, RequestStatus::Completed, now_ms);
    Ok(())
}

/// `Executing -> Failed`: no retry remains. Appends the error and stamps
/// completion; a failed record always carries at least one error entry.
pub fn apply_failed(
    request: &mut Request,
    message: impl Into<String>,
    now_ms: u64,
) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Failed)?;
    request.errors.push(ErrorEntry {
        message: message.into(),
        at_ms: now_ms,
        attempt: request.attempt_count,
    });
    request.completed_at_ms = Some(now_ms);
    commit(request, RequestStatus::Failed, now_ms);
    Ok(())
}

/// `Executing -> Pending`: the attempt failed but a retry remains (queue
/// strategy only). Appends the error; the caller re-enqueues with backoff.
pub fn apply_retry(
    request: &mut Request,
    message: impl Into<String>,
    now_ms: u64,
) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Pending)?;
    request.errors.push(ErrorEntry {
        message: message.into(),
        at_ms: now_ms,
        attempt: request.attempt_count,
    });
    commit(request, RequestStatus::Pending, now_ms);
    Ok(())
}

/// `Pending/Processing -> Cancelled`: user-initiated, accepted only before
/// execution begins.
pub fn apply_cancelled(request: &mut Request, now_ms: u64) -> Result<(), OrchestratorError> {
    validate_transition(request.status, RequestStatus::Cancelled)?;
    request.completed_at_ms = Some(now_ms);
    commit(request, RequestStatus::Cancelled, now_ms);
    Ok(())
}

/// Record executor-reported progress. Percentage is clamped so it never
/// regresses within the attempt; unknown stage labels keep the previous
/// percentage but still update the label and timestamp.
pub fn apply_progress(
    request: &mut Request,
    stage: &str,
    completed: u32,
    total: u32,
    now_ms: u64,
) {
    let pct = compute_progress(stage, completed, total).unwrap_or(request.progress.percentage);
    request.progress.current_stage = stage.to_string();
    request.progress.percentage = pct.max(request.progress.percentage);
    request.progress.updated_at_ms = now_ms;
}

/// Percentage band occupied by a named stage: `(floor, ceiling)`.
fn stage_band(stage: &str) -> Option<(u8, u8)> {
    match stage {
        "initializing" => Some((0, 0)),
        "discovery" => Some((0, 30)),
        "extraction" => Some((30, 80)),
        "aggregation" => Some((80, 95)),
        "report" => Some((95, 100)),
        _ => None,
    }
}

/// Map a stage plus a completed/total count onto the stage's percentage
/// band. Returns `None` for unrecognized stage labels.
pub fn compute_progress(stage: &str, completed: u32, total: u32) -> Option<u8> {
    let (floor, ceiling) = stage_band(stage)?;
    if total == 0 {
        return Some(floor);
    }
    let span = (ceiling - floor) as u64;
    let done = completed.min(total) as u64;
    Some(floor + (span * done / total as u64) as u8)
}
