//! In-memory store for tests and embedded use.

use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{RequestStore, StoreError};
use crate::{Request, RequestStatus};

/// Tokio-mutexed map of records. The whole map is locked for every
/// operation, which makes `conditional_update` trivially atomic.
#[derive(Default)]
pub struct InMemoryRequestStore {
    inner: Mutex<HashMap<String, Request>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all records (test utility).
    pub async fn reset(&self) {
        self.inner.lock().await.clear();
    }

    /// Number of stored records (test utility).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn get(&self, id: &str) -> Result<Option<Request>, StoreError> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn put(&self, request: &Request) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: RequestStatus,
        request: &Request,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let current = g.get(id).ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if current.status != expected {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
                actual: current.status,
            });
        }
        g.insert(id.to_string(), request.clone());
        Ok(())
    }

    async fn query_pending(&self, limit: u32) -> Result<Vec<Request>, StoreError> {
        let g = self.inner.lock().await;
        let mut pending: Vec<Request> = g
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobConfiguration, Priority};

    fn request(id: &str, priority: Priority, created_at_ms: u64) -> Request {
        let cfg = JobConfiguration {
            keywords: vec!["k".into()],
            sources: vec!["s".into()],
            thresholds: serde_json::Map::new(),
        };
        Request::new(id, cfg, priority, 3, created_at_ms)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = InMemoryRequestStore::new();
        let r = request("r-1", Priority::High, 10);
        store.put(&r).await.unwrap();
        assert_eq!(store.get("r-1").await.unwrap(), Some(r));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn conditional_update_detects_conflict() {
        let store = InMemoryRequestStore::new();
        let r = request("r-1", Priority::High, 10);
        store.put(&r).await.unwrap();

        let mut claimed = r.clone();
        claimed.status = RequestStatus::Processing;
        store
            .conditional_update("r-1", RequestStatus::Pending, &claimed)
            .await
            .unwrap();

        // A second claimant expecting Pending loses.
        let err = store
            .conditional_update("r-1", RequestStatus::Pending, &claimed)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = store
            .conditional_update("missing", RequestStatus::Pending, &claimed)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound { id: "missing".into() });
    }

    #[tokio::test]
    async fn query_pending_orders_priority_then_age() {
        let store = InMemoryRequestStore::new();
        store.put(&request("a", Priority::Low, 1)).await.unwrap();
        store.put(&request("b", Priority::High, 2)).await.unwrap();
        store.put(&request("c", Priority::High, 0)).await.unwrap();

        let ids: Vec<String> = store
            .query_pending(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let one = store.query_pending(1).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "c");
    }

    #[tokio::test]
    async fn query_pending_skips_claimed() {
        let store = InMemoryRequestStore::new();
        let r = request("r-1", Priority::High, 10);
        store.put(&r).await.unwrap();
        let mut claimed = r.clone();
        claimed.status = RequestStatus::Processing;
        store
            .conditional_update("r-1", RequestStatus::Pending, &claimed)
            .await
            .unwrap();
        assert!(store.query_pending(10).await.unwrap().is_empty());
    }
}
