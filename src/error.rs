//! Façade-level error taxonomy.
//!
//! Errors at the store/queue boundaries carry their own types
//! ([`crate::store::StoreError`], [`crate::queue::QueueError`]); this module
//! is what callers of the orchestrator see. Validation failures are rejected
//! before any record exists and are never retried. Invalid transitions and
//! claim conflicts are handled entirely inside the strategies and never
//! reach a caller. Execution and infrastructure errors end up in the
//! request's error list and, once terminal, are visible through
//! `get_status`.

use crate::RequestStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Bad configuration at submission. Rejected before a record is created.
    Validation { field: String, message: String },
    /// A state transition outside the lifecycle table was attempted.
    /// Internal guard against races and duplicate delivery; strategies log
    /// and drop these rather than surfacing them.
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    /// The workflow executor failed (or exceeded the wall-clock ceiling).
    Execution { message: String, attempt: u32 },
    /// Store or queue unavailable. `retryable` tells the caller whether
    /// repeating the call can help.
    Infrastructure {
        operation: String,
        message: String,
        retryable: bool,
    },
    /// No record exists for the id.
    NotFound { id: String },
}

impl OrchestratorError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Infrastructure { retryable: true, .. })
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::Validation { field, message } => {
                write!(f, "invalid configuration: {field}: {message}")
            }
            OrchestratorError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            OrchestratorError::Execution { message, attempt } => {
                write!(f, "execution failed (attempt {attempt}): {message}")
            }
            OrchestratorError::Infrastructure {
                operation,
                message,
                retryable,
            } => {
                write!(
                    f,
                    "infrastructure failure in {operation}: {message} (retryable: {retryable})"
                )
            }
            OrchestratorError::NotFound { id } => write!(f, "request not found: {id}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<crate::store::StoreError> for OrchestratorError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound { id } => OrchestratorError::NotFound { id },
            // Conflicts should be consumed by the strategies; if one escapes
            // to the façade, report it as a non-retryable infra failure.
            crate::store::StoreError::Conflict { id, expected, actual } => {
                OrchestratorError::Infrastructure {
                    operation: "conditional_update".to_string(),
                    message: format!("status conflict on {id}: expected {expected}, found {actual}"),
                    retryable: false,
                }
            }
            crate::store::StoreError::Backend {
                operation,
                message,
                retryable,
            } => OrchestratorError::Infrastructure {
                operation,
                message,
                retryable,
            },
        }
    }
}

impl From<crate::queue::QueueError> for OrchestratorError {
    fn from(e: crate::queue::QueueError) -> Self {
        OrchestratorError::Infrastructure {
            operation: e.operation,
            message: e.message,
            retryable: e.retryable,
        }
    }
}
