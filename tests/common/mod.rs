//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use dossier::executor::{ExecutionError, ExecutionOutput, ProgressReporter, WorkflowExecutor};
use dossier::{JobConfiguration, RequestStatus};

pub fn configuration(tag: &str) -> JobConfiguration {
    JobConfiguration {
        keywords: vec![tag.to_string()],
        sources: vec!["news".to_string(), "filings".to_string()],
        thresholds: serde_json::Map::new(),
    }
}

/// Scripted executor: fails the first `fail_first` calls per tag, succeeds
/// after. Tracks call order (by the first keyword) and the peak number of
/// concurrent executions, which must never exceed one per request.
pub struct ScriptedExecutor {
    fail_first: u32,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Fail the first `fail_first` executions (across all requests), then
    /// succeed.
    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// First keyword of each execution, in invocation order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WorkflowExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        configuration: &JobConfiguration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let call_index = {
            let mut calls = self.calls.lock().await;
            calls.push(configuration.keywords[0].clone());
            calls.len() as u32
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        progress.stage("discovery", 1, 1).await;

        let outcome = if call_index <= self.fail_first {
            Err(ExecutionError::new("search provider unavailable"))
        } else {
            progress.stage("report", 1, 1).await;
            Ok(ExecutionOutput {
                summary: serde_json::json!({
                    "keyword": configuration.keywords[0],
                    "sources": configuration.sources,
                }),
                artifact_ref: format!("reports/{}.json", configuration.keywords[0]),
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Poll `fetch` until the request reaches `expected` or the deadline
/// lapses.
pub async fn wait_for_status(
    orchestrator: &dossier::Orchestrator,
    id: &str,
    expected: RequestStatus,
    deadline: Duration,
) {
    let start = std::time::Instant::now();
    loop {
        let report = orchestrator.get_status(id).await.expect("status lookup");
        if report.status == expected {
            return;
        }
        assert!(
            start.elapsed() < deadline,
            "request {id} stuck in {:?} (wanted {expected:?})",
            report.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Build an Arc'd in-memory store as the trait object the strategies take.
pub fn in_memory_store() -> Arc<dyn dossier::store::RequestStore> {
    Arc::new(dossier::store::InMemoryRequestStore::new())
}
