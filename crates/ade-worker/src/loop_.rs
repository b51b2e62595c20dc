use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use ade_queue::environment::EnvironmentQueue;
use ade_queue::run::RunQueue;
use ade_queue::WakeSignal;

use crate::gc::Gc;
use crate::jobs::{EnvironmentJob, RunJob};
use crate::settings::WorkerSettings;

/// The single-process worker pool's main loop (§4.8): claims environment and
/// run work up to pool capacity, runs periodic maintenance, and backs off
/// geometrically when idle. Ported from `ade_worker/loop.py`.
pub struct WorkerLoop {
    run_queue: RunQueue,
    env_queue: EnvironmentQueue,
    run_job: Arc<RunJob>,
    environment_job: Arc<EnvironmentJob>,
    gc: Gc,
    settings: Arc<WorkerSettings>,
    wake: WakeSignal,
    owner: String,
}

impl WorkerLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_queue: RunQueue,
        env_queue: EnvironmentQueue,
        run_job: Arc<RunJob>,
        environment_job: Arc<EnvironmentJob>,
        gc: Gc,
        settings: Arc<WorkerSettings>,
        wake: WakeSignal,
        owner: String,
    ) -> Self {
        Self {
            run_queue,
            env_queue,
            run_job,
            environment_job,
            gc,
            settings,
            wake,
            owner,
        }
    }

    /// Runs until `shutdown` is cancelled. On cancellation, stops claiming
    /// new work and waits for in-flight jobs to finish (their leases would
    /// otherwise just expire and be reclaimed by another worker).
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut poll_interval = self.settings.poll_interval;
        let mut last_cleanup = Instant::now() - self.settings.cleanup_interval;
        let mut last_gc = Instant::now();

        loop {
            self.reap(&mut tasks);

            if shutdown.is_cancelled() {
                break;
            }

            if last_cleanup.elapsed() >= self.settings.cleanup_interval {
                self.run_cleanup().await;
                last_cleanup = Instant::now();
            }

            if let Some(gc_interval) = self.settings.gc_interval {
                if last_gc.elapsed() >= gc_interval {
                    self.run_gc().await;
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..2_000));
                    last_gc = Instant::now() - jitter.min(gc_interval / 2);
                }
            }

            if let Err(err) = self.run_queue.ensure_environment_rows_for_queued_runs().await {
                tracing::warn!(error = %err, "failed to ensure environment rows for queued runs");
            }

            let claimed_any = self.claim_until_full(&mut tasks).await;

            if claimed_any {
                poll_interval = self.settings.poll_interval;
                continue;
            }

            tokio::select! {
                _ = self.wake.wait(poll_interval) => {}
                _ = shutdown.cancelled() => {}
            }
            poll_interval = (poll_interval * 2).min(self.settings.poll_interval_max);
        }

        while tasks.join_next().await.is_some() {}
    }

    fn reap(&self, tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    tracing::error!(error = %err, "worker job panicked");
                }
            }
        }
    }

    async fn run_cleanup(&self) {
        match self.run_queue.expire_stuck().await {
            Ok(count) if count > 0 => tracing::info!(count, "expired stuck runs"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "expire_stuck(runs) failed"),
        }
        match self.env_queue.expire_stuck().await {
            Ok(count) if count > 0 => tracing::info!(count, "expired stuck environment builds"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "expire_stuck(environments) failed"),
        }
    }

    async fn run_gc(&self) {
        match self.gc.run_environment_gc().await {
            Ok(counters) => tracing::info!(
                scanned = counters.scanned,
                deleted = counters.deleted,
                skipped = counters.skipped,
                failed = counters.failed,
                "environment gc pass complete"
            ),
            Err(err) => tracing::warn!(error = %err, "environment gc failed"),
        }
        match self.gc.run_run_artifact_gc().await {
            Ok(counters) => tracing::info!(
                scanned = counters.scanned,
                deleted = counters.deleted,
                skipped = counters.skipped,
                failed = counters.failed,
                "run artifact gc pass complete"
            ),
            Err(err) => tracing::warn!(error = %err, "run artifact gc failed"),
        }
    }

    /// Claims environment work first, then run work, until the pool is full
    /// or both queues are empty. Returns whether anything was claimed.
    async fn claim_until_full(&self, tasks: &mut JoinSet<()>) -> bool {
        let mut claimed_any = false;

        while tasks.len() < self.settings.concurrency {
            match self
                .env_queue
                .claim_next(&self.owner, self.settings.lease_seconds)
                .await
            {
                Ok(Some(claim)) => {
                    claimed_any = true;
                    let job = self.environment_job.clone();
                    tasks.spawn(async move {
                        if let Err(err) = job.run(claim).await {
                            tracing::error!(error = %err, "environment job errored");
                        }
                    });
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "environment claim failed");
                    break;
                }
            }

            match self
                .run_queue
                .claim_batch(&self.owner, self.settings.lease_seconds, 1)
                .await
            {
                Ok(mut claims) if !claims.is_empty() => {
                    claimed_any = true;
                    let claim = claims.remove(0);
                    let job = self.run_job.clone();
                    tasks.spawn(async move {
                        if let Err(err) = job.run(claim).await {
                            tracing::error!(error = %err, "run job errored");
                        }
                    });
                    continue;
                }
                Ok(_) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "run claim failed");
                    break;
                }
            }
        }

        claimed_any
    }
}
