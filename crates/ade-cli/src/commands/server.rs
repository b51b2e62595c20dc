use std::sync::Arc;

use ade_api::{app, ApiSettings, AppState};
use ade_config::ConfigStorage;
use ade_queue::{EnvironmentQueue, RunQueue};

use super::{blob_adapter_from_env, connect, paths_from_env};

pub async fn run() -> anyhow::Result<()> {
    let settings = Arc::new(ApiSettings::from_env()?);
    let pool = connect(&settings.database_url).await?;
    let paths = paths_from_env();
    let blobs = blob_adapter_from_env();
    let config_storage = ConfigStorage::new(paths.clone(), Default::default());
    let run_queue = RunQueue::new(pool.clone(), 5, 300);
    let environment_queue = EnvironmentQueue::new(pool.clone());

    let state = AppState {
        pool,
        blobs,
        paths,
        config_storage,
        run_queue,
        environment_queue,
        settings: settings.clone(),
    };

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "ade-api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
