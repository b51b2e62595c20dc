use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

use ade_core::{ConfigurationId, DocumentId, EnvironmentId, RunId, WorkspaceId};
use ade_storage::model::RunStatus;

use crate::backoff::capped_exponential;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunClaim {
    pub id: RunId,
    pub workspace_id: WorkspaceId,
    pub configuration_id: ConfigurationId,
    pub document_id: DocumentId,
    pub environment_id: Option<EnvironmentId>,
    pub options: Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
}

#[derive(Clone)]
pub struct RunQueue {
    pool: PgPool,
    backoff_base_seconds: i64,
    backoff_max_seconds: i64,
}

impl RunQueue {
    pub fn new(pool: PgPool, backoff_base_seconds: i64, backoff_max_seconds: i64) -> Self {
        Self {
            pool,
            backoff_base_seconds,
            backoff_max_seconds,
        }
    }

    /// Inserts a new run in `queued` status and notifies `ade_run_queued` so
    /// an idle worker's wake signal fires without waiting for the next poll.
    /// `environment_id` is left `NULL`; `ensure_environment_rows_for_queued_runs`
    /// backfills it on the worker's next loop iteration.
    pub async fn enqueue(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        document_id: DocumentId,
        options: Value,
        max_attempts: i32,
    ) -> ade_core::Result<RunId> {
        let run_id = RunId::new();
        sqlx::query(
            r#"
            INSERT INTO runs (id, workspace_id, configuration_id, document_id, status,
                               options, attempt_count, max_attempts, available_at,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'queued', $5, 0, $6, now(), now(), now())
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .bind(configuration_id.as_uuid())
        .bind(document_id.as_uuid())
        .bind(options)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(crate::wake::RUN_QUEUED_CHANNEL)
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(run_id)
    }

    /// Claims up to `batch_size` runs whose environment is `ready`, using
    /// `FOR UPDATE SKIP LOCKED` so concurrent workers never double-claim a
    /// row and never block on each other's claims.
    pub async fn claim_batch(
        &self,
        owner: &str,
        lease_seconds: i64,
        batch_size: i64,
    ) -> ade_core::Result<Vec<RunClaim>> {
        let rows = sqlx::query_as::<_, RunClaim>(
            r#"
            WITH candidates AS (
                SELECT r.id
                FROM runs r
                JOIN environments e ON e.id = r.environment_id
                WHERE r.status IN ('queued', 'failed')
                  AND (r.retry_at IS NULL OR r.retry_at <= now())
                  AND (r.leased_until IS NULL OR r.leased_until <= now())
                  AND e.status = 'ready'
                ORDER BY r.created_at
                LIMIT $3
                FOR UPDATE OF r SKIP LOCKED
            )
            UPDATE runs
            SET status = 'running',
                attempt_count = attempt_count + 1,
                lease_owner = $1,
                leased_until = now() + make_interval(secs => $2),
                started_at = COALESCE(started_at, now()),
                updated_at = now()
            WHERE id IN (SELECT id FROM candidates)
            RETURNING id, workspace_id, configuration_id, document_id, environment_id,
                      options, attempt_count, max_attempts
            "#,
        )
        .bind(owner)
        .bind(lease_seconds as f64)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn heartbeat(&self, run_id: RunId, owner: &str, lease_seconds: i64) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET leased_until = now() + make_interval(secs => $3), updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'running'
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(owner)
        .bind(lease_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Acks a successful run. `message` carries a non-error informational
    /// note (e.g. `"Dry run"`) rather than always clearing `error_message`,
    /// since a dry run succeeds but is still worth flagging on the record.
    pub async fn ack_success(
        &self,
        run_id: RunId,
        owner: &str,
        exit_code: Option<i32>,
        output_path: Option<&str>,
        message: Option<&str>,
    ) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'succeeded',
                exit_code = $3,
                output_path = $4,
                error_message = $5,
                lease_owner = NULL,
                leased_until = NULL,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'running'
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(owner)
        .bind(exit_code)
        .bind(output_path)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Failure ack: retries (`queued`, with backoff `retry_at`) while
    /// `attempt_count < max_attempts`, otherwise terminal `failed`. Mirrors
    /// `ade_worker/queue.py`'s split between `RUN_ACK_FAILURE_REQUEUE` and
    /// `RUN_ACK_FAILURE_TERMINAL` as one statement keyed on attempt count.
    pub async fn ack_failure(
        &self,
        run_id: RunId,
        owner: &str,
        exit_code: Option<i32>,
        error: &str,
    ) -> ade_core::Result<bool> {
        let row = sqlx::query_as::<_, (i32, i32)>(
            r#"SELECT attempt_count, max_attempts FROM runs WHERE id = $1 AND lease_owner = $2"#,
        )
        .bind(run_id.as_uuid())
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        let Some((attempt_count, max_attempts)) = row else {
            return Ok(false);
        };

        let retryable = attempt_count < max_attempts;
        let retry_at = retryable.then(|| {
            let delay = capped_exponential(attempt_count, self.backoff_base_seconds, self.backoff_max_seconds);
            Utc::now() + chrono::Duration::seconds(delay)
        });
        let status: RunStatus = if retryable {
            RunStatus::Queued
        } else {
            RunStatus::Failed
        };

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $3,
                retry_at = $4,
                exit_code = $5,
                error_message = $6,
                lease_owner = NULL,
                leased_until = NULL,
                completed_at = CASE WHEN $3 = 'failed' THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(owner)
        .bind(status)
        .bind(retry_at)
        .bind(exit_code)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Releases a claimed run back to `queued` *without* consuming a retry
    /// attempt, used when the run's environment was not ready at claim
    /// time (the run job discovers this after claiming and gives the slot
    /// back immediately rather than burning an attempt on an environment
    /// problem).
    pub async fn release_for_env(&self, run_id: RunId, owner: &str) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'queued',
                attempt_count = GREATEST(attempt_count - 1, 0),
                lease_owner = NULL,
                leased_until = NULL,
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'running'
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Sweeps runs whose lease has expired without a heartbeat, same
    /// requeue/terminal split as [`Self::ack_failure`] applied in bulk.
    pub async fn expire_stuck(&self) -> ade_core::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = CASE WHEN attempt_count < max_attempts THEN 'queued' ELSE 'failed' END,
                retry_at = CASE WHEN attempt_count < max_attempts
                    THEN now() + make_interval(secs =>
                        LEAST($2::double precision, $1::double precision * POWER(2, GREATEST(attempt_count - 1, 0))))
                    ELSE NULL END,
                error_message = 'lease expired',
                lease_owner = NULL,
                leased_until = NULL,
                completed_at = CASE WHEN attempt_count < max_attempts THEN completed_at ELSE now() END,
                updated_at = now()
            WHERE status = 'running' AND leased_until IS NOT NULL AND leased_until <= now()
            "#,
        )
        .bind(self.backoff_base_seconds as f64)
        .bind(self.backoff_max_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Idempotent upsert: ensures every `queued` run without an
    /// `environment_id` gets one (inserting a `queued` environment row
    /// keyed by workspace+configuration+engine_spec+dependency_digest if
    /// none exists yet, else reusing the existing row).
    pub async fn ensure_environment_rows_for_queued_runs(&self) -> ade_core::Result<u64> {
        let result = sqlx::query(
            r#"
            WITH missing AS (
                SELECT DISTINCT r.workspace_id, r.configuration_id, c.engine_spec, c.dependency_digest
                FROM runs r
                JOIN configurations c ON c.id = r.configuration_id
                WHERE r.status = 'queued' AND r.environment_id IS NULL
            )
            INSERT INTO environments (id, workspace_id, configuration_id, engine_spec, dependency_digest,
                                       status, attempt_count, max_attempts, created_at, updated_at)
            SELECT gen_random_uuid(), workspace_id, configuration_id, engine_spec, dependency_digest,
                   'queued', 0, 3, now(), now()
            FROM missing
            ON CONFLICT (workspace_id, configuration_id, engine_spec, dependency_digest) DO NOTHING
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE runs r
            SET environment_id = e.id, updated_at = now()
            FROM environments e
            WHERE r.status = 'queued'
              AND r.environment_id IS NULL
              AND e.workspace_id = r.workspace_id
              AND e.configuration_id = r.configuration_id
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
