use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ade_queue::{EnvironmentQueue, RunQueue, RunQueueListener, WakeSignal};
use ade_worker::{EnvironmentJob, Gc, RunJob, WorkerLoop, WorkerSettings};

use super::{blob_adapter_from_env, connect, paths_from_env};

pub async fn run() -> anyhow::Result<()> {
    let settings = Arc::new(WorkerSettings::from_env()?);
    let pool = connect(&settings.database_url).await?;
    let paths = paths_from_env();
    let blob = blob_adapter_from_env();

    let run_queue = RunQueue::new(pool.clone(), settings.backoff_base_seconds, settings.backoff_max_seconds);
    let env_queue = EnvironmentQueue::new(pool.clone());

    let owner = format!("{}-{}", hostname(), std::process::id());
    let run_job = Arc::new(RunJob::new(
        pool.clone(),
        run_queue.clone(),
        env_queue.clone(),
        paths.clone(),
        blob.clone(),
        settings.clone(),
        owner.clone(),
    ));
    let environment_job = Arc::new(EnvironmentJob::new(
        pool.clone(),
        env_queue.clone(),
        paths.clone(),
        settings.clone(),
        owner.clone(),
    ));
    let gc = Gc::new(pool.clone(), paths.clone(), settings.clone());

    let wake = WakeSignal::new();
    let listener = RunQueueListener::new(settings.database_url.clone(), wake.clone());
    let listener_handle = tokio::spawn(listener.run());

    let worker_loop = WorkerLoop::new(run_queue, env_queue, run_job, environment_job, gc, settings, wake, owner);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight jobs");
        shutdown_signal.cancel();
    });

    worker_loop.run(shutdown).await;
    listener_handle.abort();
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}
