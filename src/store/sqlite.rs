//! SQLite-backed request store.
//!
//! The record is persisted as one JSON column plus the handful of indexed
//! columns the pending query needs. The conditional update is a single
//! `UPDATE ... WHERE request_id = ? AND status = ?` whose rows-affected
//! count is the compare-and-swap outcome, so exclusivity holds across
//! processes sharing the database file.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{RequestStore, StoreError};
use crate::{Request, RequestStatus};

pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    /// Open (or create) a store at the given SQLite URL, e.g.
    /// `sqlite:requests.db` or `sqlite::memory:`.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = OFF").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    }
                    // Retry on locks instead of failing immediately
                    sqlx::query("PRAGMA busy_timeout = 60000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Self::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Shared-cache in-memory store so multiple pooled connections see the
    /// same database. Each call gets its own database, so concurrently
    /// running tests never observe each other's records.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let name = uuid::Uuid::new_v4().simple().to_string();
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        Self::new(&url).await
    }

    async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                request_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_requests_pending ON requests(status, priority, created_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Convert an sqlx error into a classified store error.
    fn sqlx_to_store_error(operation: &str, e: sqlx::Error) -> StoreError {
        let msg = e.to_string();
        if msg.contains("database is locked") || msg.contains("SQLITE_BUSY") {
            return StoreError::backend_retryable(operation, format!("database locked: {msg}"));
        }
        if msg.contains("UNIQUE constraint") || msg.contains("PRIMARY KEY") {
            return StoreError::backend_permanent(operation, format!("constraint violation: {msg}"));
        }
        if msg.contains("connection") || msg.contains("timeout") {
            return StoreError::backend_retryable(operation, format!("connection error: {msg}"));
        }
        StoreError::backend_retryable(operation, msg)
    }

    fn encode(operation: &str, request: &Request) -> Result<String, StoreError> {
        serde_json::to_string(request)
            .map_err(|e| StoreError::backend_permanent(operation, format!("serialization error: {e}")))
    }

    fn decode(operation: &str, record: &str) -> Result<Request, StoreError> {
        serde_json::from_str(record)
            .map_err(|e| StoreError::backend_permanent(operation, format!("deserialization error: {e}")))
    }
}

#[async_trait::async_trait]
impl RequestStore for SqliteRequestStore {
    async fn get(&self, id: &str) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query("SELECT record FROM requests WHERE request_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_store_error("get", e))?;

        match row {
            Some(row) => {
                let record: String = row
                    .try_get("record")
                    .map_err(|e| StoreError::backend_permanent("get", format!("missing record column: {e}")))?;
                Ok(Some(Self::decode("get", &record)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, request: &Request) -> Result<(), StoreError> {
        let record = Self::encode("put", request)?;
        sqlx::query(
            r#"
            INSERT INTO requests (request_id, status, priority, created_at, record)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(request_id) DO UPDATE SET
                status = excluded.status,
                priority = excluded.priority,
                created_at = excluded.created_at,
                record = excluded.record
            "#,
        )
        .bind(&request.id)
        .bind(request.status.as_str())
        .bind(request.priority.rank() as i64)
        .bind(request.created_at_ms as i64)
        .bind(&record)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::sqlx_to_store_error("put", e))?;
        Ok(())
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: RequestStatus,
        request: &Request,
    ) -> Result<(), StoreError> {
        let record = Self::encode("conditional_update", request)?;
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = ?1, record = ?2
            WHERE request_id = ?3 AND status = ?4
            "#,
        )
        .bind(request.status.as_str())
        .bind(&record)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::sqlx_to_store_error("conditional_update", e))?;

        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing record.
            let actual = sqlx::query("SELECT status FROM requests WHERE request_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Self::sqlx_to_store_error("conditional_update", e))?;
            return match actual {
                Some(row) => {
                    let status: String = row.try_get("status").map_err(|e| {
                        StoreError::backend_permanent("conditional_update", format!("missing status column: {e}"))
                    })?;
                    let actual = RequestStatus::parse(&status).ok_or_else(|| {
                        StoreError::backend_permanent(
                            "conditional_update",
                            format!("unrecognized stored status: {status}"),
                        )
                    })?;
                    Err(StoreError::Conflict {
                        id: id.to_string(),
                        expected,
                        actual,
                    })
                }
                None => Err(StoreError::NotFound { id: id.to_string() }),
            };
        }
        Ok(())
    }

    async fn query_pending(&self, limit: u32) -> Result<Vec<Request>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM requests
            WHERE status = 'Pending'
            ORDER BY priority DESC, created_at ASC, request_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::sqlx_to_store_error("query_pending", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record").map_err(|e| {
                StoreError::backend_permanent("query_pending", format!("missing record column: {e}"))
            })?;
            out.push(Self::decode("query_pending", &record)?);
        }
        Ok(out)
    }
}
