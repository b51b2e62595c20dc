pub mod admin;
pub mod server;
pub mod worker;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use ade_storage::{BlobAdapter, LocalBlobAdapter, ObjectStoreBlobAdapter, PathManager};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?)
}

/// Builds the path manager from the same `ADE_*_DIR` variables the worker
/// uses, so `server` and `worker` processes agree on where everything
/// lives without sharing a settings struct.
pub fn paths_from_env() -> PathManager {
    PathManager::new(
        std::env::var("ADE_WORKSPACES_DIR").unwrap_or_else(|_| "./data/workspaces".into()),
        std::env::var("ADE_DOCUMENTS_DIR").unwrap_or_else(|_| "./data/documents".into()),
        std::env::var("ADE_CONFIGS_DIR").unwrap_or_else(|_| "./data/configs".into()),
        std::env::var("ADE_RUNS_DIR").unwrap_or_else(|_| "./data/runs".into()),
        std::env::var("ADE_VENVS_DIR").unwrap_or_else(|_| "./data/venvs".into()),
    )
}

/// Chooses between the filesystem and S3-compatible blob adapters based on
/// `ADE_BLOB_BACKEND` (`local` by default, `s3` for `ADE_BLOB_BASE_URL`).
pub fn blob_adapter_from_env() -> Arc<dyn BlobAdapter> {
    match std::env::var("ADE_BLOB_BACKEND").as_deref() {
        Ok("s3") => {
            let base_url = std::env::var("ADE_BLOB_BASE_URL").unwrap_or_default();
            Arc::new(ObjectStoreBlobAdapter::new(base_url))
        }
        _ => {
            let root = std::env::var("ADE_BLOB_ROOT").unwrap_or_else(|_| "./data/blobs".into());
            Arc::new(LocalBlobAdapter::new(root))
        }
    }
}
