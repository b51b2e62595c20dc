use std::sync::Arc;

use sqlx::PgPool;

use ade_config::ConfigStorage;
use ade_queue::{EnvironmentQueue, RunQueue};
use ade_storage::{BlobAdapter, PathManager};

use crate::settings::ApiSettings;

/// Shared, cheaply-clonable handle every axum extractor reaches into.
/// One instance is built at startup in `ade-cli` and handed to
/// [`crate::app`].
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub blobs: Arc<dyn BlobAdapter>,
    pub paths: PathManager,
    pub config_storage: ConfigStorage,
    pub run_queue: RunQueue,
    pub environment_queue: EnvironmentQueue,
    pub settings: Arc<ApiSettings>,
}
