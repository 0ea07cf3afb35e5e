//! Orchestrator configuration.
//!
//! Built once at process start and handed into the orchestrator and
//! strategies; the core never reads ambient environment state.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Configuration for the orchestrator and whichever strategy it drives.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Table strategy: sleep between polls when no pending request was
    /// found. Lower values = more responsive, higher store load when idle.
    pub poll_interval: Duration,
    /// Queue strategy: number of concurrent consumer workers.
    pub worker_count: usize,
    /// Queue strategy: long-poll wait per receive call.
    pub receive_wait: Duration,
    /// Queue strategy: how long a received message stays invisible to other
    /// workers before it is considered abandoned and redelivered.
    pub visibility_timeout: Duration,
    /// Automatic retries permitted after the initial execution attempt
    /// (queue strategy only).
    pub max_attempts: u32,
    /// Backoff schedule for retry redelivery.
    pub retry: RetryPolicy,
    /// Wall-clock ceiling on a single workflow executor call. Exceeding it
    /// records the attempt as a failure eligible for the normal retry path.
    pub execution_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            worker_count: 4,
            receive_wait: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry: RetryPolicy::default(),
            execution_timeout: Duration::from_secs(15 * 60),
        }
    }
}
