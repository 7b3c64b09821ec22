//! Ingest job queue repository
//!
//! The queue's only hard concurrency requirement is [`IngestJobRepository::claim_next`]:
//! at most one job is handed out per call, and two concurrent callers never
//! receive the same job. The PostgreSQL implementation locks a single row with
//! `FOR UPDATE SKIP LOCKED`, so a contended row is skipped instead of waited on.

use crate::db::{db_error, DatabasePool};
use crate::models::{IngestJob, QueueStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inlet_common::types::{JobId, JobStatus};
use inlet_common::{Error, Result};
use uuid::Uuid;

/// Attempts used when the caller passes a non-positive value
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Ingest job repository trait
#[async_trait]
pub trait IngestJobRepository: Send + Sync {
    /// Queue a new job, immediately claimable
    async fn enqueue(&self, payload: Vec<u8>, max_attempts: i32) -> Result<IngestJob>;

    /// Claim the oldest claimable job, or `None` without waiting
    async fn claim_next(&self) -> Result<Option<IngestJob>>;

    async fn mark_done(&self, id: JobId, accepted: i32, dropped: i32) -> Result<()>;

    /// Return the job to the queue, claimable again at `available_at`
    async fn mark_retry(&self, id: JobId, available_at: DateTime<Utc>, last_error: &str)
        -> Result<()>;

    /// Terminal failure
    async fn mark_failed(&self, id: JobId, last_error: &str) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<IngestJob>>;

    async fn stats(&self) -> Result<QueueStats>;
}

pub(crate) fn effective_max_attempts(max_attempts: i32) -> i32 {
    if max_attempts <= 0 {
        DEFAULT_MAX_ATTEMPTS
    } else {
        max_attempts
    }
}

/// Database ingest job repository
pub struct DbIngestJobRepository {
    pool: DatabasePool,
}

impl DbIngestJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn update_status(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        id: JobId,
    ) -> Result<()> {
        let result = query.execute(self.pool.pool()).await.map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("ingest job {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl IngestJobRepository for DbIngestJobRepository {
    async fn enqueue(&self, payload: Vec<u8>, max_attempts: i32) -> Result<IngestJob> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query_as::<_, IngestJob>(
            r#"
            INSERT INTO inbound_ingest_jobs (
                id, status, payload, attempts, max_attempts, available_at,
                last_error, accepted, dropped, created_at, updated_at
            )
            VALUES ($1, $2, $3, 0, $4, $5, '', 0, 0, $5, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(JobStatus::Queued.as_str())
        .bind(payload)
        .bind(effective_max_attempts(max_attempts))
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn claim_next(&self) -> Result<Option<IngestJob>> {
        sqlx::query_as::<_, IngestJob>(
            r#"
            WITH next_job AS (
                SELECT id FROM inbound_ingest_jobs
                WHERE status = 'queued' AND available_at <= NOW()
                ORDER BY available_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbound_ingest_jobs AS jobs
            SET status = 'processing',
                attempts = jobs.attempts + 1,
                locked_at = NOW(),
                updated_at = NOW()
            FROM next_job
            WHERE jobs.id = next_job.id
            RETURNING jobs.*
            "#,
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn mark_done(&self, id: JobId, accepted: i32, dropped: i32) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE inbound_ingest_jobs
            SET status = 'done', accepted = $2, dropped = $3, last_error = '',
                locked_at = NULL, done_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(accepted)
        .bind(dropped);
        self.update_status(query, id).await
    }

    async fn mark_retry(
        &self,
        id: JobId,
        available_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE inbound_ingest_jobs
            SET status = 'queued', available_at = $2, last_error = $3,
                locked_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(available_at)
        .bind(last_error);
        self.update_status(query, id).await
    }

    async fn mark_failed(&self, id: JobId, last_error: &str) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE inbound_ingest_jobs
            SET status = 'failed', last_error = $2,
                locked_at = NULL, done_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_error);
        self.update_status(query, id).await
    }

    async fn get(&self, id: JobId) -> Result<Option<IngestJob>> {
        sqlx::query_as::<_, IngestJob>("SELECT * FROM inbound_ingest_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM inbound_ingest_jobs GROUP BY status",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Queued) => stats.queued = count,
                Ok(JobStatus::Processing) => stats.processing = count,
                Ok(JobStatus::Done) => stats.done = count,
                Ok(JobStatus::Failed) => stats.failed = count,
                Err(_) => {}
            }
        }
        Ok(stats)
    }
}
