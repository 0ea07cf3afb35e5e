//! Root orchestrator: the single façade callers go through.
//!
//! Validates inbound configurations, assigns ids, writes the initial
//! `Pending` record, and delegates delivery to whichever strategy was
//! configured at construction. Submission, status lookup, result fetch and
//! cancellation all pass through here, so callers never know which
//! strategy is active.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::OrchestratorOptions;
use crate::error::OrchestratorError;
use crate::store::RequestStore;
use crate::strategy::{CancelOutcome, ProcessingStrategy};
use crate::{now_millis, ErrorEntry, JobConfiguration, Priority, Progress, Request, RequestResult, RequestStatus};

/// Caller-facing view of a request's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: RequestStatus,
    pub progress: Progress,
    pub errors: Vec<ErrorEntry>,
    pub attempt_count: u32,
}

/// Outcome of a result fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedResult {
    Ready(RequestResult),
    /// The request has not completed; carries where it currently stands.
    NotReady { status: RequestStatus },
}

pub struct Orchestrator {
    store: Arc<dyn RequestStore>,
    strategy: Arc<dyn ProcessingStrategy>,
    options: OrchestratorOptions,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        strategy: Arc<dyn ProcessingStrategy>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            strategy,
            options,
            joins: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the configured strategy's background delivery tasks. Installs
    /// a default tracing subscriber if none is set (ok to call many times).
    pub async fn start(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
            )
            .try_init();
        let handles = self.strategy.clone().start();
        self.joins.lock().await.extend(handles);
    }

    /// Stop background tasks: cooperative flag first, then abort.
    pub async fn shutdown(&self) {
        self.strategy.shutdown();
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
    }

    /// Validate and accept a new job. Returns the assigned request id.
    /// Rejected configurations never create a record.
    pub async fn submit(
        &self,
        configuration: JobConfiguration,
        priority: Priority,
    ) -> Result<String, OrchestratorError> {
        validate_configuration(&configuration)?;

        let id = Uuid::new_v4().to_string();
        let request = Request::new(
            &id,
            configuration,
            priority,
            self.options.max_attempts,
            now_millis(),
        );
        self.store.put(&request).await.map_err(OrchestratorError::from)?;
        self.strategy.submit(&request).await?;
        info!(request_id = %id, priority = ?priority, "request submitted");
        Ok(id)
    }

    pub async fn get_status(&self, id: &str) -> Result<StatusReport, OrchestratorError> {
        let request = self
            .strategy
            .status(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })?;
        Ok(StatusReport {
            status: request.status,
            progress: request.progress,
            errors: request.errors,
            attempt_count: request.attempt_count,
        })
    }

    /// Fetch the result, or where the request currently stands if it has
    /// not completed.
    pub async fn get_results(&self, id: &str) -> Result<FetchedResult, OrchestratorError> {
        let request = self
            .strategy
            .status(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })?;
        match request.result {
            Some(result) if request.status == RequestStatus::Completed => {
                Ok(FetchedResult::Ready(result))
            }
            _ => Ok(FetchedResult::NotReady {
                status: request.status,
            }),
        }
    }

    /// Request cancellation. Accepted only before execution begins; an
    /// in-flight execution finishes on its own.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, OrchestratorError> {
        self.strategy.cancel(id).await
    }
}

/// Submission-time validation: required fields only. Priority is typed, so
/// membership in the recognized set is enforced by construction.
fn validate_configuration(configuration: &JobConfiguration) -> Result<(), OrchestratorError> {
    if configuration.keywords.is_empty() {
        return Err(OrchestratorError::validation("keywords", "at least one keyword is required"));
    }
    if configuration.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(OrchestratorError::validation("keywords", "keywords must not be blank"));
    }
    if configuration.sources.is_empty() {
        return Err(OrchestratorError::validation("sources", "at least one source is required"));
    }
    Ok(())
}
