//! Polling strategy over the request store.
//!
//! A single poller claims the highest-priority, oldest pending request with
//! a conditional update and executes it synchronously. Multiple pollers
//! against the same store stay mutually exclusive purely through that
//! conditional write; a lost claim abandons the iteration. There is no
//! automatic retry here: one stuck request looping would starve everything
//! behind it, so a failed execution goes straight to `Failed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    begin_execution, cancel_request, claim_pending, run_executor, CancelOutcome,
    ProcessingStrategy, StoreProgressReporter,
};
use crate::config::OrchestratorOptions;
use crate::error::OrchestratorError;
use crate::executor::WorkflowExecutor;
use crate::store::RequestStore;
use crate::{now_millis, tracker, Request, RequestResult, RequestStatus};

pub struct TableStrategy {
    store: Arc<dyn RequestStore>,
    executor: Arc<dyn WorkflowExecutor>,
    options: OrchestratorOptions,
    shutdown_flag: Arc<AtomicBool>,
}

impl TableStrategy {
    pub fn new(
        store: Arc<dyn RequestStore>,
        executor: Arc<dyn WorkflowExecutor>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            executor,
            options,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One poll iteration: claim and fully process at most one pending
    /// request. Returns whether a request was claimed, so the loop (and
    /// deterministic tests) can tell work from idleness.
    pub async fn poll_once(&self) -> Result<bool, OrchestratorError> {
        let batch = self.store.query_pending(1).await.map_err(OrchestratorError::from)?;
        let Some(candidate) = batch.into_iter().next() else {
            return Ok(false);
        };

        // Re-read immediately before the claim: a cancellation written
        // between the query and here must win.
        let current = self
            .store
            .get(&candidate.id)
            .await
            .map_err(OrchestratorError::from)?;
        let Some(current) = current else {
            return Ok(false);
        };
        if current.status != RequestStatus::Pending {
            debug!(request_id = %current.id, status = %current.status, "candidate no longer pending; skipping");
            return Ok(false);
        }

        let Some(claimed) = claim_pending(&self.store, &current)
            .await
            .map_err(OrchestratorError::from)?
        else {
            // Another poller raced us; abandon the iteration.
            return Ok(false);
        };

        self.process(claimed).await?;
        Ok(true)
    }

    async fn process(&self, claimed: Request) -> Result<(), OrchestratorError> {
        let id = claimed.id.clone();
        let Some(executing) = begin_execution(&self.store, &claimed)
            .await
            .map_err(OrchestratorError::from)?
        else {
            return Ok(());
        };

        let reporter = StoreProgressReporter::new(self.store.clone(), executing.clone());
        let outcome = run_executor(
            self.executor.as_ref(),
            &executing,
            &reporter,
            self.options.execution_timeout,
        )
        .await;
        let mut latest = reporter.into_request().await;

        match outcome {
            Ok(output) => {
                tracker::apply_completed(
                    &mut latest,
                    RequestResult {
                        summary: output.summary,
                        artifact_ref: output.artifact_ref,
                    },
                    now_millis(),
                )?;
                self.store
                    .conditional_update(&id, RequestStatus::Executing, &latest)
                    .await
                    .map_err(OrchestratorError::from)?;
                info!(request_id = %id, attempt = latest.attempt_count, "request completed");
            }
            Err(e) => {
                // Terminal on first failure: the table strategy never retries.
                tracker::apply_failed(&mut latest, e.message.clone(), now_millis())?;
                self.store
                    .conditional_update(&id, RequestStatus::Executing, &latest)
                    .await
                    .map_err(OrchestratorError::from)?;
                warn!(request_id = %id, error = %e, "request failed");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProcessingStrategy for TableStrategy {
    async fn submit(&self, request: &Request) -> Result<(), OrchestratorError> {
        // The persisted Pending record is the queue; the poller will find it.
        debug!(request_id = %request.id, priority = ?request.priority, "request accepted for polling");
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<Option<Request>, OrchestratorError> {
        self.store.get(id).await.map_err(OrchestratorError::from)
    }

    async fn cancel(&self, id: &str) -> Result<CancelOutcome, OrchestratorError> {
        cancel_request(&self.store, id).await
    }

    fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let poll_interval = self.options.poll_interval;
        let shutdown = self.shutdown_flag.clone();
        let strategy = self;
        let handle = tokio::spawn(async move {
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match strategy.poll_once().await {
                    Ok(true) => {
                        // More work may be waiting; poll again immediately.
                    }
                    Ok(false) => {
                        tokio::time::sleep(poll_interval).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "poll iteration failed; backing off");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        });
        vec![handle]
    }

    fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}
