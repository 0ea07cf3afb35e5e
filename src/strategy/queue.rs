//! Queue strategy: producer plus a pool of consumer workers.
//!
//! Submission enqueues one message per request (id + a copy of the
//! configuration). Each worker runs an independent receive-claim-execute-ack
//! loop. The queue delivers at-least-once; the conditional claim against
//! the store is what collapses duplicate deliveries to one execution. A
//! failed attempt either re-enters `Pending` and is re-enqueued with
//! exponential backoff, or, once attempts are exhausted, goes to `Failed`
//! and the message is published to the dead-letter queue for offline
//! inspection.
//!
//! Workers are stateless between messages; worker identity is never
//! recorded on the request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    begin_execution, cancel_request, claim_pending, run_executor, with_infra_retry, CancelOutcome,
    ProcessingStrategy, StoreProgressReporter,
};
use crate::config::OrchestratorOptions;
use crate::error::OrchestratorError;
use crate::executor::WorkflowExecutor;
use crate::queue::{Delivery, JobMessage, WorkQueue};
use crate::store::RequestStore;
use crate::{now_millis, tracker, Request, RequestResult, RequestStatus};

pub struct QueueStrategy {
    store: Arc<dyn RequestStore>,
    queue: Arc<dyn WorkQueue>,
    executor: Arc<dyn WorkflowExecutor>,
    options: OrchestratorOptions,
    shutdown_flag: Arc<AtomicBool>,
}

impl QueueStrategy {
    pub fn new(
        store: Arc<dyn RequestStore>,
        queue: Arc<dyn WorkQueue>,
        executor: Arc<dyn WorkflowExecutor>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            queue,
            executor,
            options,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One worker step: receive at most one message and process it to its
    /// ack. Returns whether a message was received. Public so tests can
    /// drive delivery deterministically without background workers.
    pub async fn process_next_message(&self) -> Result<bool, OrchestratorError> {
        let delivery = self
            .queue
            .receive(self.options.receive_wait, self.options.visibility_timeout)
            .await
            .map_err(OrchestratorError::from)?;
        match delivery {
            Some(delivery) => {
                self.handle_delivery(delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), OrchestratorError> {
        let id = delivery.message.request_id.clone();

        let current = with_infra_retry(|| self.store.get(&id), "get request")
            .await
            .map_err(OrchestratorError::from)?;
        let Some(current) = current else {
            warn!(request_id = %id, "message for unknown request; acking and dropping");
            self.ack_best_effort(&delivery.token).await;
            return Ok(());
        };

        if current.status != RequestStatus::Pending {
            // Duplicate delivery, a crashed worker's resurfaced message, or
            // a cancellation that landed while the message sat in the
            // queue. The transition guard says: drop, never reprocess.
            debug!(request_id = %id, status = %current.status, "delivery for non-pending request; dropping");
            self.ack_best_effort(&delivery.token).await;
            return Ok(());
        }

        let Some(claimed) = claim_pending(&self.store, &current)
            .await
            .map_err(OrchestratorError::from)?
        else {
            // Lost the conditional claim to a concurrent delivery.
            self.ack_best_effort(&delivery.token).await;
            return Ok(());
        };

        let Some(executing) = begin_execution(&self.store, &claimed)
            .await
            .map_err(OrchestratorError::from)?
        else {
            self.ack_best_effort(&delivery.token).await;
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
                with_infra_retry(
                    || self.store.conditional_update(&id, RequestStatus::Executing, &latest),
                    "persist completion",
                )
                .await
                .map_err(OrchestratorError::from)?;
                self.queue
                    .ack(&delivery.token)
                    .await
                    .map_err(OrchestratorError::from)?;
                info!(request_id = %id, attempt = latest.attempt_count, "request completed");
            }
            Err(e) => {
                if latest.attempt_count <= latest.max_attempts {
                    self.retry_attempt(&delivery, latest, &e.message).await?;
                } else {
                    self.exhaust_attempts(&delivery, latest, &e.message).await?;
                }
            }
        }
        Ok(())
    }

    /// A retry remains: record the failure, re-enter `Pending`, re-enqueue
    /// a fresh copy with backoff, then ack the original so it is never
    /// redelivered alongside the new copy.
    async fn retry_attempt(
        &self,
        delivery: &Delivery,
        mut latest: Request,
        error_message: &str,
    ) -> Result<(), OrchestratorError> {
        let id = latest.id.clone();
        tracker::apply_retry(&mut latest, error_message, now_millis())?;
        with_infra_retry(
            || self.store.conditional_update(&id, RequestStatus::Executing, &latest),
            "persist retry",
        )
        .await
        .map_err(OrchestratorError::from)?;

        let delay = self.options.retry.delay_for(latest.attempt_count);
        with_infra_retry(
            || self.queue.enqueue(delivery.message.clone(), Some(delay)),
            "re-enqueue retry",
        )
        .await
        .map_err(OrchestratorError::from)?;

        self.queue
            .ack(&delivery.token)
            .await
            .map_err(OrchestratorError::from)?;
        info!(
            request_id = %id,
            attempt = latest.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "attempt failed; re-enqueued with backoff"
        );
        Ok(())
    }

    /// No retry remains: record the terminal failure, publish the message
    /// to the dead-letter queue, ack the original.
    async fn exhaust_attempts(
        &self,
        delivery: &Delivery,
        mut latest: Request,
        error_message: &str,
    ) -> Result<(), OrchestratorError> {
        let id = latest.id.clone();
        tracker::apply_failed(&mut latest, error_message, now_millis())?;
        with_infra_retry(
            || self.store.conditional_update(&id, RequestStatus::Executing, &latest),
            "persist failure",
        )
        .await
        .map_err(OrchestratorError::from)?;

        with_infra_retry(
            || self.queue.send_to_dead_letter(delivery.message.clone()),
            "dead-letter",
        )
        .await
        .map_err(OrchestratorError::from)?;

        self.queue
            .ack(&delivery.token)
            .await
            .map_err(OrchestratorError::from)?;
        warn!(
            request_id = %id,
            attempts = latest.attempt_count,
            "attempts exhausted; request failed and dead-lettered"
        );
        Ok(())
    }

    /// Ack a message we decided to drop. A lapsed lease is fine here: the
    /// redelivered copy will hit the same non-pending guard.
    async fn ack_best_effort(&self, token: &str) {
        if let Err(e) = self.queue.ack(token).await {
            debug!(error = %e, "ack of dropped delivery failed");
        }
    }
}

#[async_trait::async_trait]
impl ProcessingStrategy for QueueStrategy {
    async fn submit(&self, request: &Request) -> Result<(), OrchestratorError> {
        let message = JobMessage {
            request_id: request.id.clone(),
            configuration: request.configuration.clone(),
        };
        self.queue
            .enqueue(message, None)
            .await
            .map_err(OrchestratorError::from)?;
        debug!(request_id = %request.id, priority = ?request.priority, "request enqueued");
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<Option<Request>, OrchestratorError> {
        self.store.get(id).await.map_err(OrchestratorError::from)
    }

    async fn cancel(&self, id: &str) -> Result<CancelOutcome, OrchestratorError> {
        cancel_request(&self.store, id).await
    }

    fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.options.worker_count);
        for worker_idx in 0..self.options.worker_count {
            let strategy = self.clone();
            let shutdown = self.shutdown_flag.clone();
            handles.push(tokio::spawn(async move {
                debug!(worker_idx, "queue worker started");
                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!(worker_idx, "queue worker exiting");
                        break;
                    }
                    match strategy.process_next_message().await {
                        Ok(_) => {
                            // receive() long-polls, so an empty pass is
                            // already rate-limited.
                        }
                        Err(e) => {
                            warn!(worker_idx, error = %e, "worker step failed; backing off");
                            tokio::time::sleep(Duration::from_millis(250)).await;
                        }
                    }
                }
            }));
        }
        handles
    }

    fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}
