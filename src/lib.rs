//! Request orchestration core for long-running intelligence-gathering jobs.
//!
//! A job is submitted once, tracked through the lifecycle
//! `PENDING -> PROCESSING -> EXECUTING -> {COMPLETED | FAILED}` (with
//! `CANCELLED` reachable before execution begins), and delivered to exactly
//! one execution attempt at a time under one of two interchangeable
//! strategies:
//!
//! - [`strategy::table::TableStrategy`]: a single poller over the durable
//!   [`store::RequestStore`], claiming work with conditional status updates.
//! - [`strategy::queue::QueueStrategy`]: a producer plus a pool of consumer
//!   workers over a [`queue::WorkQueue`], with exponential-backoff retries
//!   and dead-lettering when attempts are exhausted.
//!
//! The actual intelligence-gathering pipeline (search, extraction,
//! aggregation, report synthesis) is an external collaborator behind
//! [`executor::WorkflowExecutor`]; this crate owns only the orchestration:
//! the state machine, the claim discipline that makes at-least-once delivery
//! safe, and the retry/dead-letter bookkeeping.
//!
//! Entry point: [`orchestrator::Orchestrator`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod store;
pub mod strategy;
pub mod tracker;

pub use config::OrchestratorOptions;
pub use error::OrchestratorError;
pub use executor::{ExecutionError, ExecutionOutput, ProgressReporter, WorkflowExecutor};
pub use orchestrator::{FetchedResult, Orchestrator, StatusReport};
pub use retry::RetryPolicy;
pub use strategy::{CancelOutcome, ProcessingStrategy};

/// Current wall-clock time as milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock should be after UNIX epoch")
        .as_millis() as u64
}

/// Delivery ordering class for a request. Ordering only; an in-flight
/// request is never preempted by a higher-priority arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank for ordering (higher dispatches first).
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Priority> {
        match rank {
            2 => Some(Priority::High),
            1 => Some(Priority::Medium),
            0 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Lifecycle state of a request. Transitions are validated by
/// [`tracker::validate_transition`]; nothing mutates status outside that
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Processing,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Processing => "Processing",
            RequestStatus::Executing => "Executing",
            RequestStatus::Completed => "Completed",
            RequestStatus::Failed => "Failed",
            RequestStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<RequestStatus> {
        match s {
            "Pending" => Some(RequestStatus::Pending),
            "Processing" => Some(RequestStatus::Processing),
            "Executing" => Some(RequestStatus::Executing),
            "Completed" => Some(RequestStatus::Completed),
            "Failed" => Some(RequestStatus::Failed),
            "Cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to gather. Opaque to the orchestration core beyond submission-time
/// validation; passed unmodified to the workflow executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    /// Search keywords driving discovery. At least one non-blank entry.
    pub keywords: Vec<String>,
    /// Source identifiers to gather from. At least one entry.
    pub sources: Vec<String>,
    /// Free-form tuning knobs (relevance thresholds, result caps, ...)
    /// interpreted only by the executor.
    #[serde(default)]
    pub thresholds: serde_json::Map<String, serde_json::Value>,
}

/// Executor-reported position within the current execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Free-form stage label from the executor ("discovery", "extraction", ...).
    pub current_stage: String,
    /// 0-100, monotonically non-decreasing within one attempt.
    pub percentage: u8,
    pub updated_at_ms: u64,
}

impl Progress {
    pub fn queued(now_ms: u64) -> Self {
        Self {
            current_stage: "queued".to_string(),
            percentage: 0,
            updated_at_ms: now_ms,
        }
    }
}

/// Terminal output of a completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    /// Opaque summary payload returned by the workflow executor.
    pub summary: serde_json::Value,
    /// Handle to where the full report output is persisted.
    pub artifact_ref: String,
}

/// One recorded failure. The list on a request is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub at_ms: u64,
    /// Execution attempt that produced the failure (1-based).
    pub attempt: u32,
}

/// One committed status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub at_ms: u64,
}

/// The unit of work: a single intelligence-gathering job and its full
/// orchestration state, persisted as one flat keyed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Globally unique, immutable, assigned at submission.
    pub id: String,
    pub configuration: JobConfiguration,
    pub priority: Priority,
    pub status: RequestStatus,
    pub progress: Progress,
    /// Present only once status is `Completed`.
    pub result: Option<RequestResult>,
    /// Append-only failure log; `Failed` always carries at least one entry.
    pub errors: Vec<ErrorEntry>,
    /// Append-only transition log maintained by the tracker.
    pub history: Vec<StatusChange>,
    /// Execution attempts started so far. Bounded by `max_attempts + 1`.
    pub attempt_count: u32,
    /// Automatic retries permitted after the initial attempt (queue
    /// strategy only; the table strategy never retries).
    pub max_attempts: u32,
    pub created_at_ms: u64,
    /// Set exactly once, on the first claim. Retries do not reset it.
    pub started_at_ms: Option<u64>,
    /// Set on entry to any terminal state.
    pub completed_at_ms: Option<u64>,
}

impl Request {
    /// Build a fresh record in `Pending`, ready to persist.
    pub fn new(
        id: impl Into<String>,
        configuration: JobConfiguration,
        priority: Priority,
        max_attempts: u32,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            configuration,
            priority,
            status: RequestStatus::Pending,
            progress: Progress::queued(now_ms),
            result: None,
            errors: Vec::new(),
            history: Vec::new(),
            attempt_count: 0,
            max_attempts,
            created_at_ms: now_ms,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            RequestStatus::Pending,
            RequestStatus::Processing,
            RequestStatus::Executing,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(RequestStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RequestStatus::parse("Unknown"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(!RequestStatus::Executing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() > Priority::Medium.rank());
        assert!(Priority::Medium.rank() > Priority::Low.rank());
        assert_eq!(Priority::from_rank(Priority::High.rank()), Some(Priority::High));
        assert_eq!(Priority::from_rank(9), None);
    }

    #[test]
    fn new_request_starts_pending() {
        let cfg = JobConfiguration {
            keywords: vec!["solar".into()],
            sources: vec!["web".into()],
            thresholds: serde_json::Map::new(),
        };
        let r = Request::new("r-1", cfg, Priority::Medium, 3, 1_000);
        assert_eq!(r.status, RequestStatus::Pending);
        assert_eq!(r.attempt_count, 0);
        assert!(r.started_at_ms.is_none());
        assert!(r.result.is_none());
        assert_eq!(r.progress.percentage, 0);
    }
}
