//! Durable keyed storage for request records.
//!
//! The orchestrator never assumes a particular storage engine; everything
//! it needs is behind [`RequestStore`]. The one hard requirement on any
//! implementation is an atomic conditional write: `conditional_update`
//! must compare the stored status and apply the new record in a single
//! indivisible step, because that compare-and-swap is the only mutual
//! exclusion between competing claimants.

use crate::{Request, RequestStatus};

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryRequestStore;
pub use sqlite::SqliteRequestStore;

/// Store-boundary error with retry classification.
///
/// `Conflict` is the optimistic-concurrency signal: the record's status did
/// not match the caller's expectation. Strategies treat it as "someone else
/// got there first" and drop the attempt silently. `Backend` failures carry
/// a retryable/permanent split: transient outages (locked database,
/// connection loss) are retryable, data-shape problems are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Conditional update found a different status than expected.
    Conflict {
        id: String,
        expected: RequestStatus,
        actual: RequestStatus,
    },
    /// No record for the id.
    NotFound { id: String },
    /// Storage backend failure.
    Backend {
        operation: String,
        message: String,
        retryable: bool,
    },
}

impl StoreError {
    /// Transient backend failure; repeating the call may succeed.
    pub fn backend_retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Permanent backend failure; retrying cannot help.
    pub fn backend_permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend { retryable: true, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict { id, expected, actual } => {
                write!(f, "conflict on {id}: expected {expected}, found {actual}")
            }
            StoreError::NotFound { id } => write!(f, "request not found: {id}"),
            StoreError::Backend {
                operation, message, ..
            } => write!(f, "{operation}: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable keyed storage for [`Request`] records.
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    /// Point read by id.
    async fn get(&self, id: &str) -> Result<Option<Request>, StoreError>;

    /// Unconditional write (create or replace). Used only for the initial
    /// `Pending` record; every later mutation goes through
    /// `conditional_update`.
    async fn put(&self, request: &Request) -> Result<(), StoreError>;

    /// Replace the record only if its stored status equals `expected`.
    /// Returns `StoreError::Conflict` (with the actual status) otherwise.
    /// This is the exclusive-claim primitive; it must be atomic.
    async fn conditional_update(
        &self,
        id: &str,
        expected: RequestStatus,
        request: &Request,
    ) -> Result<(), StoreError>;

    /// Up to `limit` `Pending` requests ordered by priority (high first),
    /// then submission time (oldest first).
    async fn query_pending(&self, limit: u32) -> Result<Vec<Request>, StoreError>;
}
