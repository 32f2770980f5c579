//! PostgreSQL adapter for the approval store.
//!
//! The transactional source of truth. Each request is one row holding its
//! JSON record plus the `state` and `current_level` columns the guard
//! checks against. Transitions lock the row, append the audit entry and
//! update the row inside one transaction.

use crate::chain::seal;
use crate::traits::{
    ApprovalFilter, ApprovalStore, AuditLog, CommittedTransition, QueryWindow,
};
use crate::{StorageError, StorageResult};
use approval_types::{ApprovalId, ApprovalRequest, AuditEntry, StateGuard, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

/// PostgreSQL-backed approval store.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS approval_requests (
                approval_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                current_level BIGINT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_requests_state_idx
                ON approval_requests (state)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_audit (
                approval_id TEXT NOT NULL REFERENCES approval_requests (approval_id),
                sequence BIGINT NOT NULL,
                entry JSONB NOT NULL,
                hash TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (approval_id, sequence)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PostgresApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> StorageResult<AuditEntry> {
        let entry = seal(request.creation_draft(), &request.id, 1, None)?;
        let record = to_json(&request)?;

        let mut tx = self.pool.begin().await.map_err(backend)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO approval_requests
                (approval_id, state, current_level, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (approval_id) DO NOTHING
            "#,
        )
        .bind(request.id.as_str())
        .bind(request.state.as_str())
        .bind(request.current_level as i64)
        .bind(record)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "approval {} already exists",
                request.id
            )));
        }

        insert_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(backend)?;
        Ok(entry)
    }

    async fn compare_and_transition(
        &self,
        id: &ApprovalId,
        expected: StateGuard,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<CommittedTransition>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(
            "SELECT record FROM approval_requests WHERE approval_id = $1 FOR UPDATE",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| StorageError::NotFound(format!("approval {} not found", id)))?;

        let mut request = request_from_row(&row)?;
        if !expected.matches(&request) {
            return Ok(None);
        }

        let draft = request.apply(transition, at)?;

        let updated = sqlx::query(
            r#"
            UPDATE approval_requests
               SET state = $1,
                   current_level = $2,
                   record = $3,
                   updated_at = $4
             WHERE approval_id = $5
               AND state = $6
               AND current_level = $7
            "#,
        )
        .bind(request.state.as_str())
        .bind(request.current_level as i64)
        .bind(to_json(&request)?)
        .bind(request.updated_at)
        .bind(id.as_str())
        .bind(expected.state.as_str())
        .bind(expected.level as i64)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            tracing::warn!(approval_id = %id, "Guarded update matched no row under lock");
            return Ok(None);
        }

        let last = sqlx::query(
            r#"
            SELECT sequence, hash
              FROM approval_audit
             WHERE approval_id = $1
             ORDER BY sequence DESC
             LIMIT 1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let (sequence, previous_hash) = match last {
            Some(row) => {
                let sequence: i64 = row.try_get("sequence").map_err(backend)?;
                let hash: String = row.try_get("hash").map_err(backend)?;
                (sequence as u64 + 1, Some(hash))
            }
            None => (1, None),
        };

        let entry = seal(draft, id, sequence, previous_hash)?;
        insert_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(backend)?;

        Ok(Some(CommittedTransition { request, entry }))
    }

    async fn get(&self, id: &ApprovalId) -> StorageResult<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT record FROM approval_requests WHERE approval_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn list(&self, filter: &ApprovalFilter) -> StorageResult<Vec<ApprovalRequest>> {
        let (limit, offset) = window_bounds(filter.window);
        let rows = sqlx::query(
            r#"
            SELECT record
              FROM approval_requests
             WHERE ($1::TEXT IS NULL OR state = $1)
             ORDER BY created_at DESC, approval_id ASC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(request_from_row).collect()
    }

    async fn list_awaiting(&self) -> StorageResult<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT record FROM approval_requests WHERE state IN ('pending', 'escalated')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(request_from_row).collect()
    }
}

#[async_trait]
impl AuditLog for PostgresApprovalStore {
    async fn list_audit(
        &self,
        id: &ApprovalId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        let (limit, offset) = window_bounds(window);
        let rows = sqlx::query(
            r#"
            SELECT entry
              FROM approval_audit
             WHERE approval_id = $1
             ORDER BY sequence ASC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("entry").map_err(backend)?;
                serde_json::from_value(value)
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }
}

async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &AuditEntry,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO approval_audit (approval_id, sequence, entry, hash, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.approval_id.as_str())
    .bind(entry.sequence as i64)
    .bind(to_json(entry)?)
    .bind(&entry.hash)
    .bind(entry.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

fn request_from_row(row: &PgRow) -> StorageResult<ApprovalRequest> {
    let value: Value = row.try_get("record").map_err(backend)?;
    serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// `LIMIT NULL` is unbounded in PostgreSQL.
fn window_bounds(window: QueryWindow) -> (Option<i64>, i64) {
    let limit = (window.limit > 0).then_some(window.limit as i64);
    (limit, window.offset as i64)
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}
