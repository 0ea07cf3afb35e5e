//! Delivery strategies.
//!
//! A strategy gets a persisted `Pending` request to exactly one execution
//! attempt at a time and records the outcome. Both implementations present
//! the same contract; the choice is made once at deployment and the façade
//! never switches dynamically. Running both strategies against the same
//! request store concurrently is unsupported and undefined.
//!
//! The exclusive-claim discipline shared by both lives here: every
//! transition goes through the tracker and is persisted with a conditional
//! update, so a lost race is always observed as a `Conflict` and dropped
//! without side effects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::executor::{ExecutionError, ExecutionOutput, ProgressReporter, WorkflowExecutor};
use crate::store::{RequestStore, StoreError};
use crate::{now_millis, tracker, Request, RequestStatus};

pub mod queue;
pub mod table;

pub use queue::QueueStrategy;
pub use table::TableStrategy;

/// Outcome of a cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request was cancelled before execution began.
    Accepted,
    /// The request is already executing or terminal; it will finish on its
    /// own. Cancellation is cooperative, never preemptive.
    AlreadyTerminal,
}

/// Interchangeable delivery mechanism sharing one submit/status/cancel
/// contract. Strategy choice is deployment-time configuration.
#[async_trait::async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Hand a freshly persisted `Pending` request to the delivery
    /// mechanism. The record is already in the store when this is called.
    async fn submit(&self, request: &Request) -> Result<(), OrchestratorError>;

    /// Current record for the id, if any.
    async fn status(&self, id: &str) -> Result<Option<Request>, OrchestratorError>;

    /// Cancel the request if execution has not begun.
    async fn cancel(&self, id: &str) -> Result<CancelOutcome, OrchestratorError>;

    /// Spawn the strategy's background delivery tasks.
    fn start(self: Arc<Self>) -> Vec<JoinHandle<()>>;

    /// Signal background tasks to stop at their next loop check.
    fn shutdown(&self);
}

/// Claim a `Pending` request via `Pending -> Processing`. Returns the
/// claimed record, or `None` when the claim was lost to a racing claimant
/// or the record is gone; both are silent drops.
pub(crate) async fn claim_pending(
    store: &Arc<dyn RequestStore>,
    request: &Request,
) -> Result<Option<Request>, StoreError> {
    let mut claimed = request.clone();
    if tracker::apply_claim(&mut claimed, now_millis()).is_err() {
        // The snapshot is no longer Pending; nothing to claim.
        return Ok(None);
    }
    match store
        .conditional_update(&request.id, RequestStatus::Pending, &claimed)
        .await
    {
        Ok(()) => Ok(Some(claimed)),
        Err(StoreError::Conflict { id, actual, .. }) => {
            debug!(request_id = %id, actual = %actual, "claim lost; dropping delivery");
            Ok(None)
        }
        Err(StoreError::NotFound { id }) => {
            warn!(request_id = %id, "record vanished before claim; dropping delivery");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Advance a claimed request via `Processing -> Executing`. A conflict here
/// means the claim was stolen out from under us; drop.
pub(crate) async fn begin_execution(
    store: &Arc<dyn RequestStore>,
    claimed: &Request,
) -> Result<Option<Request>, StoreError> {
    let mut executing = claimed.clone();
    if tracker::apply_execution_started(&mut executing, now_millis()).is_err() {
        return Ok(None);
    }
    match store
        .conditional_update(&claimed.id, RequestStatus::Processing, &executing)
        .await
    {
        Ok(()) => Ok(Some(executing)),
        Err(StoreError::Conflict { id, actual, .. }) => {
            debug!(request_id = %id, actual = %actual, "lost claim before execution; dropping");
            Ok(None)
        }
        Err(StoreError::NotFound { id }) => {
            warn!(request_id = %id, "record vanished before execution; dropping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Shared cancellation path: accepted only while the request is `Pending`
/// or `Processing`. A lost race (the request advanced or finished first)
/// degrades to `AlreadyTerminal`.
pub(crate) async fn cancel_request(
    store: &Arc<dyn RequestStore>,
    id: &str,
) -> Result<CancelOutcome, OrchestratorError> {
    let current = store
        .get(id)
        .await
        .map_err(OrchestratorError::from)?
        .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })?;

    if !matches!(
        current.status,
        RequestStatus::Pending | RequestStatus::Processing
    ) {
        return Ok(CancelOutcome::AlreadyTerminal);
    }

    let expected = current.status;
    let mut cancelled = current;
    tracker::apply_cancelled(&mut cancelled, now_millis())?;
    match store.conditional_update(id, expected, &cancelled).await {
        Ok(()) => Ok(CancelOutcome::Accepted),
        Err(StoreError::Conflict { .. }) => Ok(CancelOutcome::AlreadyTerminal),
        Err(e) => Err(e.into()),
    }
}

/// Run the executor under the configured wall-clock ceiling. A timeout is
/// just another failed attempt.
pub(crate) async fn run_executor(
    executor: &dyn WorkflowExecutor,
    request: &Request,
    progress: &dyn ProgressReporter,
    ceiling: Duration,
) -> Result<ExecutionOutput, ExecutionError> {
    match tokio::time::timeout(ceiling, executor.execute(&request.configuration, progress)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ExecutionError::new(format!(
            "execution exceeded wall-clock ceiling of {}s",
            ceiling.as_secs()
        ))),
    }
}

/// Progress reporter that persists stage updates through the store's
/// conditional update, keyed on the record still being `Executing`. Keeps a
/// snapshot of the record so the final transition starts from the latest
/// persisted progress.
pub(crate) struct StoreProgressReporter {
    store: Arc<dyn RequestStore>,
    snapshot: Mutex<Request>,
}

impl StoreProgressReporter {
    pub(crate) fn new(store: Arc<dyn RequestStore>, executing: Request) -> Self {
        Self {
            store,
            snapshot: Mutex::new(executing),
        }
    }

    /// The latest record snapshot, including any persisted progress.
    pub(crate) async fn into_request(self) -> Request {
        self.snapshot.into_inner()
    }
}

#[async_trait::async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn stage(&self, stage: &str, completed: u32, total: u32) {
        let mut req = self.snapshot.lock().await;
        tracker::apply_progress(&mut req, stage, completed, total, now_millis());
        if let Err(e) = self
            .store
            .conditional_update(&req.id, RequestStatus::Executing, &req)
            .await
        {
            // Progress is advisory; a failed write never fails the attempt.
            debug!(request_id = %req.id, error = %e, "progress update dropped");
        }
    }
}

/// Errors that carry a retryable/permanent classification.
pub(crate) trait Retryable {
    fn retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn retryable(&self) -> bool {
        self.is_retryable()
    }
}

impl Retryable for crate::queue::QueueError {
    fn retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Retry a fallible infrastructure call in place with short exponential
/// backoff. This retries the *call*, not the request; callers decide what a
/// final failure means for the delivery. Non-retryable errors (conflicts,
/// corruption) return immediately.
pub(crate) async fn with_infra_retry<F, Fut, T, E>(operation: F, operation_tag: &str) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempts: u32 = 0;
    let max_attempts: u32 = 5;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if e.retryable() && attempts < max_attempts => {
                let backoff_ms = 10u64.saturating_mul(1 << attempts);
                warn!(attempts, backoff_ms, error = %e, "{operation_tag} failed; retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
