use std::sync::Arc;

use sqlx::PgPool;
use tokio::fs;

use ade_core::{EnvironmentId, WorkspaceId};
use ade_storage::PathManager;

use crate::settings::WorkerSettings;

/// Outcome of one garbage-collection pass, reported by both the environment
/// and run-artifact sweeps (§4.9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCounters {
    pub scanned: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl GcCounters {
    fn record(&mut self, outcome: CandidateOutcome) {
        self.scanned += 1;
        match outcome {
            CandidateOutcome::Deleted => self.deleted += 1,
            CandidateOutcome::Skipped => self.skipped += 1,
            CandidateOutcome::Failed => self.failed += 1,
        }
    }
}

enum CandidateOutcome {
    Deleted,
    Skipped,
    Failed,
}

#[derive(Debug, sqlx::FromRow)]
struct EnvironmentCandidate {
    id: EnvironmentId,
}

#[derive(Debug, sqlx::FromRow)]
struct RunCandidate {
    id: ade_core::RunId,
    workspace_id: WorkspaceId,
}

/// Sweeps idle environments and expired run artifacts off disk. Ported from
/// `ade_worker/gc.py`.
pub struct Gc {
    pool: PgPool,
    paths: PathManager,
    settings: Arc<WorkerSettings>,
}

impl Gc {
    pub fn new(pool: PgPool, paths: PathManager, settings: Arc<WorkerSettings>) -> Self {
        Self { pool, paths, settings }
    }

    /// Deletes environments owned by a non-active configuration, idle past
    /// the TTL, with no queued/running run still bound to them. The on-disk
    /// env root is removed before the DB row, so a crash between the two
    /// leaves a retryable DB row rather than a dangling directory reference.
    pub async fn run_environment_gc(&self) -> ade_core::Result<GcCounters> {
        let candidates = sqlx::query_as::<_, EnvironmentCandidate>(
            r#"
            SELECT e.id
            FROM environments e
            JOIN configurations c ON c.id = e.configuration_id
            WHERE c.status != 'active'
              AND e.status IN ('ready', 'failed')
              AND COALESCE(e.last_used_at, e.updated_at) < now() - make_interval(days => $1)
              AND NOT EXISTS (
                  SELECT 1 FROM runs r
                  WHERE r.workspace_id = e.workspace_id
                    AND r.configuration_id = e.configuration_id
                    AND r.environment_id = e.id
                    AND r.status IN ('queued', 'running')
              )
            "#,
        )
        .bind(self.settings.env_ttl_days)
        .fetch_all(&self.pool)
        .await?;

        let mut counters = GcCounters::default();
        for candidate in candidates {
            let outcome = self.delete_environment(candidate.id).await;
            counters.record(outcome);
        }
        Ok(counters)
    }

    async fn delete_environment(&self, environment_id: EnvironmentId) -> CandidateOutcome {
        let root = match self.paths.environment_root(environment_id) {
            Ok(root) => root,
            Err(err) => {
                tracing::warn!(%environment_id, error = %err, "gc: could not resolve environment root");
                return CandidateOutcome::Failed;
            }
        };

        match remove_dir_if_exists(&root).await {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(%environment_id, error = %err, "gc: failed to remove environment directory");
                return CandidateOutcome::Failed;
            }
        }

        let result = sqlx::query("DELETE FROM environments WHERE id = $1 AND status IN ('ready', 'failed')")
            .bind(environment_id.as_uuid())
            .execute(&self.pool)
            .await;
        match result {
            Ok(result) if result.rows_affected() == 1 => CandidateOutcome::Deleted,
            Ok(_) => CandidateOutcome::Skipped,
            Err(err) => {
                tracing::warn!(%environment_id, error = %err, "gc: failed to delete environment row");
                CandidateOutcome::Failed
            }
        }
    }

    /// Deletes the on-disk directory tree of terminal runs whose
    /// `completed_at` is older than the (optional) artifact TTL. The run row
    /// itself is left in place as the historical record.
    pub async fn run_run_artifact_gc(&self) -> ade_core::Result<GcCounters> {
        let Some(ttl_days) = self.settings.run_artifact_ttl_days else {
            return Ok(GcCounters::default());
        };

        let candidates = sqlx::query_as::<_, RunCandidate>(
            r#"
            SELECT id, workspace_id
            FROM runs
            WHERE status IN ('succeeded', 'failed')
              AND completed_at IS NOT NULL
              AND completed_at < now() - make_interval(days => $1)
            "#,
        )
        .bind(ttl_days)
        .fetch_all(&self.pool)
        .await?;

        let mut counters = GcCounters::default();
        for candidate in candidates {
            let outcome = self.delete_run_artifacts(candidate.workspace_id, candidate.id).await;
            counters.record(outcome);
        }
        Ok(counters)
    }

    async fn delete_run_artifacts(&self, workspace_id: WorkspaceId, run_id: ade_core::RunId) -> CandidateOutcome {
        let root = match self.paths.run_root(workspace_id, run_id) {
            Ok(root) => root,
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "gc: could not resolve run root");
                return CandidateOutcome::Failed;
            }
        };
        match fs::try_exists(&root).await {
            Ok(false) => CandidateOutcome::Skipped,
            Ok(true) => match fs::remove_dir_all(&root).await {
                Ok(()) => CandidateOutcome::Deleted,
                Err(err) => {
                    tracing::warn!(%run_id, error = %err, "gc: failed to remove run directory");
                    CandidateOutcome::Failed
                }
            },
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "gc: failed to stat run directory");
                CandidateOutcome::Failed
            }
        }
    }
}

async fn remove_dir_if_exists(path: &std::path::Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_tally_each_outcome_independently() {
        let mut counters = GcCounters::default();
        counters.record(CandidateOutcome::Deleted);
        counters.record(CandidateOutcome::Skipped);
        counters.record(CandidateOutcome::Failed);
        counters.record(CandidateOutcome::Deleted);
        assert_eq!(
            counters,
            GcCounters {
                scanned: 4,
                deleted: 2,
                skipped: 1,
                failed: 1,
            }
        );
    }
}
