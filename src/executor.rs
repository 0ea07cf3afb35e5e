//! Workflow executor boundary.
//!
//! The intelligence-gathering pipeline itself (query construction, content
//! extraction, aggregation, report synthesis) lives behind this trait.
//! The orchestration core treats it as a single awaitable call with its own
//! internal retry policy and imposes only a wall-clock ceiling from the
//! outside.

use crate::JobConfiguration;

/// Executor failure. Deliberately opaque: the orchestrator records the
/// message and decides retry/terminal purely from its own attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// What the executor hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    /// Opaque summary payload; stored verbatim on the request.
    pub summary: serde_json::Value,
    /// Handle to where the full report output is persisted.
    pub artifact_ref: String,
}

/// Stage callbacks from the executor into the orchestrator. Implementations
/// persist progress updates; errors are swallowed by the implementation so
/// progress reporting can never fail an execution.
#[async_trait::async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Report entering (or advancing within) a named stage with
    /// `completed` of `total` stage-local work items done.
    async fn stage(&self, stage: &str, completed: u32, total: u32);
}

/// Discards all progress reports. For tests and fire-and-forget callers.
pub struct NoopReporter;

#[async_trait::async_trait]
impl ProgressReporter for NoopReporter {
    async fn stage(&self, _stage: &str, _completed: u32, _total: u32) {}
}

/// The external intelligence-gathering pipeline.
#[async_trait::async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(
        &self,
        configuration: &JobConfiguration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExecutionOutput, ExecutionError>;
}
