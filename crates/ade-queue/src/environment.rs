use sqlx::PgPool;

use ade_core::EnvironmentId;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnvironmentClaim {
    pub id: EnvironmentId,
    pub attempt_count: i32,
    pub max_attempts: i32,
}

/// Environments have no retry/backoff: a build either succeeds, or fails
/// and stays `failed` until a new run forces a rebuild (§4.6). Unlike
/// [`crate::RunQueue`] this queue takes no backoff parameters.
#[derive(Clone)]
pub struct EnvironmentQueue {
    pool: PgPool,
}

impl EnvironmentQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claims one `queued` (or due-for-retry) environment row by
    /// id for building, bumping `attempt_count` and setting the lease.
    /// Returns `None` if the row is not in a claimable state (already
    /// claimed, or the lease has not expired).
    pub async fn claim_for_build(
        &self,
        environment_id: EnvironmentId,
        owner: &str,
        lease_seconds: i64,
    ) -> ade_core::Result<Option<EnvironmentClaim>> {
        let row = sqlx::query_as::<_, EnvironmentClaim>(
            r#"
            UPDATE environments
            SET status = 'building',
                attempt_count = attempt_count + 1,
                lease_owner = $2,
                leased_until = now() + make_interval(secs => $3),
                updated_at = now()
            WHERE id = $1
              AND status IN ('queued', 'failed')
              AND (retry_at IS NULL OR retry_at <= now())
              AND (leased_until IS NULL OR leased_until <= now())
            RETURNING id, attempt_count, max_attempts
            "#,
        )
        .bind(environment_id.as_uuid())
        .bind(owner)
        .bind(lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Claims the single oldest claimable environment row, same semantics
    /// as [`Self::claim_for_build`] but without a caller-supplied id — used
    /// by the worker loop's generic poll.
    pub async fn claim_next(
        &self,
        owner: &str,
        lease_seconds: i64,
    ) -> ade_core::Result<Option<EnvironmentClaim>> {
        let row = sqlx::query_as::<_, EnvironmentClaim>(
            r#"
            UPDATE environments
            SET status = 'building',
                attempt_count = attempt_count + 1,
                lease_owner = $1,
                leased_until = now() + make_interval(secs => $2),
                updated_at = now()
            WHERE id = (
                SELECT id FROM environments
                WHERE status IN ('queued', 'failed')
                  AND (retry_at IS NULL OR retry_at <= now())
                  AND (leased_until IS NULL OR leased_until <= now())
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, attempt_count, max_attempts
            "#,
        )
        .bind(owner)
        .bind(lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn heartbeat(
        &self,
        environment_id: EnvironmentId,
        owner: &str,
        lease_seconds: i64,
    ) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET leased_until = now() + make_interval(secs => $3),
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'building'
            "#,
        )
        .bind(environment_id.as_uuid())
        .bind(owner)
        .bind(lease_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn ack_success(
        &self,
        environment_id: EnvironmentId,
        owner: &str,
        engine_version: Option<&str>,
        python_interpreter: Option<&str>,
        python_version: Option<&str>,
    ) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = 'ready',
                engine_version = $3,
                python_interpreter = $4,
                python_version = $5,
                last_error = NULL,
                lease_owner = NULL,
                leased_until = NULL,
                last_used_at = now(),
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'building'
            "#,
        )
        .bind(environment_id.as_uuid())
        .bind(owner)
        .bind(engine_version)
        .bind(python_interpreter)
        .bind(python_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks a build attempt as failed. Environments have no retry/backoff
    /// (unlike runs): a failed build goes straight to terminal `failed` and
    /// stays there until a new run forces a rebuild.
    pub async fn ack_failure(
        &self,
        environment_id: EnvironmentId,
        owner: &str,
        error: &str,
    ) -> ade_core::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = 'failed',
                retry_at = NULL,
                last_error = $3,
                lease_owner = NULL,
                leased_until = NULL,
                updated_at = now()
            WHERE id = $1 AND lease_owner = $2 AND status = 'building'
            "#,
        )
        .bind(environment_id.as_uuid())
        .bind(owner)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Refreshes `last_used_at` so a run in progress against this
    /// environment can never race the GC's idle-TTL scan (§4.9).
    pub async fn touch_last_used(&self, environment_id: EnvironmentId) -> ade_core::Result<()> {
        sqlx::query("UPDATE environments SET last_used_at = now() WHERE id = $1")
            .bind(environment_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forces a `ready` environment whose venv has gone missing on disk
    /// back to `queued` for a rebuild, used by the run job when it finds
    /// the environment row ready but the interpreter absent.
    pub async fn requeue_for_rebuild(&self, environment_id: EnvironmentId) -> ade_core::Result<()> {
        sqlx::query(
            r#"
            UPDATE environments
            SET status = 'queued', retry_at = NULL, last_error = 'venv missing, rebuilding', updated_at = now()
            WHERE id = $1 AND status = 'ready'
            "#,
        )
        .bind(environment_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sweeps rows whose lease has expired without a heartbeat back to
    /// `queued` for another worker to pick up. Unlike the run queue, a
    /// stuck environment build is never terminally failed by this sweep —
    /// only an explicit `ack_failure` from the worker that held the lease
    /// does that.
    pub async fn expire_stuck(&self) -> ade_core::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE environments
            SET status = 'queued',
                retry_at = NULL,
                last_error = 'lease expired',
                lease_owner = NULL,
                leased_until = NULL,
                updated_at = now()
            WHERE status = 'building' AND leased_until IS NOT NULL AND leased_until <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
