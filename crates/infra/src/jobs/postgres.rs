//! Postgres-backed pending and recovery queues.
//!
//! Claims use `DELETE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)
//! RETURNING ...`: selection and removal happen in one statement, and rows
//! locked by a concurrent claimer are skipped rather than waited on, so any
//! number of scheduler processes can share the tables.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use typhoon_core::{
    AssetId, Job, JobId, ModelTypeId, NewJob, NewRecoveryJob, RecoveryJob, RecoveryJobId, UserId,
};

use super::store::{JobStore, RecoveryStore};
use crate::db::{StoreError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(
        skip(self),
        fields(
            user_id = %job.target.user_id,
            asset_id = %job.target.asset_id,
            priority = job.priority
        ),
        err
    )]
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        let id = JobId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO job (id, user_id, asset_id, model_type_id, created_at, priority)
            VALUES ($1, $2, $3, $4, now(), $5)
            RETURNING id, user_id, asset_id, model_type_id, created_at, priority
            "#,
        )
        .bind(id.as_uuid())
        .bind(job.target.user_id.get())
        .bind(job.target.asset_id.get())
        .bind(job.target.model_type_id.get())
        .bind(job.priority)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue_job", e))?;

        JobRow::from_row(&row)
            .map(Into::into)
            .map_err(|e| StoreError::Storage(format!("failed to decode job row: {}", e)))
    }

    #[instrument(skip(self), err)]
    async fn claim_oldest(&self, priority: bool) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM job
            WHERE id = (
                SELECT id FROM job
                WHERE priority = $1
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, user_id, asset_id, model_type_id, created_at, priority
            "#,
        )
        .bind(priority)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?;

        row.map(|row| {
            JobRow::from_row(&row)
                .map(Into::into)
                .map_err(|e| StoreError::Storage(format!("failed to decode job row: {}", e)))
        })
        .transpose()
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM job")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Storage(format!("failed to read count: {}", e)))?;
        Ok(total.max(0) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresRecoveryStore {
    pool: Arc<PgPool>,
}

impl PostgresRecoveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl RecoveryStore for PostgresRecoveryStore {
    #[instrument(
        skip(self),
        fields(
            user_id = %job.target.user_id,
            asset_id = %job.target.asset_id,
            attempts = job.attempts
        ),
        err
    )]
    async fn push(&self, job: NewRecoveryJob) -> Result<RecoveryJob, StoreError> {
        let id = RecoveryJobId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO recovery_job (id, user_id, asset_id, model_type_id, created_at, attempts)
            VALUES ($1, $2, $3, $4, now(), $5)
            RETURNING id, user_id, asset_id, model_type_id, created_at, attempts
            "#,
        )
        .bind(id.as_uuid())
        .bind(job.target.user_id.get())
        .bind(job.target.asset_id.get())
        .bind(job.target.model_type_id.get())
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("push_recovery_job", e))?;

        RecoveryJobRow::from_row(&row)
            .map(Into::into)
            .map_err(|e| StoreError::Storage(format!("failed to decode recovery_job row: {}", e)))
    }

    #[instrument(skip(self), err)]
    async fn pop_oldest(&self) -> Result<Option<RecoveryJob>, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM recovery_job
            WHERE id = (
                SELECT id FROM recovery_job
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, user_id, asset_id, model_type_id, created_at, attempts
            "#,
        )
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pop_recovery_job", e))?;

        row.map(|row| {
            RecoveryJobRow::from_row(&row)
                .map(Into::into)
                .map_err(|e| StoreError::Storage(format!("failed to decode recovery_job row: {}", e)))
        })
        .transpose()
    }

    async fn recovery_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM recovery_job")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_recovery_jobs", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Storage(format!("failed to read count: {}", e)))?;
        Ok(total.max(0) as u64)
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    user_id: i64,
    asset_id: i64,
    model_type_id: i64,
    created_at: DateTime<Utc>,
    priority: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            asset_id: row.try_get("asset_id")?,
            model_type_id: row.try_get("model_type_id")?,
            created_at: row.try_get("created_at")?,
            priority: row.try_get("priority")?,
        })
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::from_uuid(row.id),
            user_id: UserId(row.user_id),
            asset_id: AssetId(row.asset_id),
            model_type_id: ModelTypeId(row.model_type_id),
            created_at: row.created_at,
            priority: row.priority,
        }
    }
}

#[derive(Debug)]
struct RecoveryJobRow {
    id: Uuid,
    user_id: i64,
    asset_id: i64,
    model_type_id: i64,
    created_at: DateTime<Utc>,
    attempts: i32,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for RecoveryJobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(RecoveryJobRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            asset_id: row.try_get("asset_id")?,
            model_type_id: row.try_get("model_type_id")?,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get("attempts")?,
        })
    }
}

impl From<RecoveryJobRow> for RecoveryJob {
    fn from(row: RecoveryJobRow) -> Self {
        RecoveryJob {
            id: RecoveryJobId::from_uuid(row.id),
            user_id: UserId(row.user_id),
            asset_id: AssetId(row.asset_id),
            model_type_id: ModelTypeId(row.model_type_id),
            created_at: row.created_at,
            attempts: row.attempts.max(0) as u32,
        }
    }
}
