use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration, loaded once from `ADE_*` environment variables at
/// process start. Ported from `ade_worker/settings.py`'s env-var-driven
/// settings object.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub workspaces_dir: PathBuf,
    pub venvs_dir: PathBuf,
    pub pip_cache_dir: PathBuf,
    pub blob_root: PathBuf,
    pub engine_spec: String,
    pub run_timeout: Duration,
    pub build_timeout: Duration,
    pub concurrency: usize,
    pub lease_seconds: i64,
    pub max_attempts: i32,
    pub backoff_base_seconds: i64,
    pub backoff_max_seconds: i64,
    pub poll_interval: Duration,
    pub poll_interval_max: Duration,
    pub cleanup_interval: Duration,
    pub gc_interval: Option<Duration>,
    pub env_ttl_days: i64,
    pub run_artifact_ttl_days: Option<i64>,
}

impl WorkerSettings {
    pub fn from_env() -> ade_core::Result<Self> {
        let database_url = require_env("ADE_DATABASE_URL")?;
        let workspaces_dir = env_path("ADE_WORKSPACES_DIR", "./data/workspaces");
        let venvs_dir = env_path("ADE_VENVS_DIR", "./data/venvs");
        let pip_cache_dir = env_path("ADE_PIP_CACHE_DIR", "./data/cache/pip");
        let blob_root = env_path("ADE_BLOB_ROOT", "./data/blobs");

        Ok(Self {
            database_url,
            workspaces_dir,
            venvs_dir,
            pip_cache_dir,
            blob_root,
            engine_spec: env_string("ADE_ENGINE_SPEC", "ade-engine"),
            run_timeout: env_seconds("ADE_RUN_TIMEOUT_SECONDS", 300),
            build_timeout: env_seconds("ADE_BUILD_TIMEOUT", 600),
            concurrency: env_usize("ADE_WORKER_CONCURRENCY", default_concurrency()),
            lease_seconds: env_i64("ADE_WORKER_JOB_LEASE_SECONDS", 60),
            max_attempts: env_i32("ADE_WORKER_JOB_MAX_ATTEMPTS", 3),
            backoff_base_seconds: env_i64("ADE_WORKER_JOB_BACKOFF_BASE_SECONDS", 5),
            backoff_max_seconds: env_i64("ADE_WORKER_JOB_BACKOFF_MAX_SECONDS", 300),
            poll_interval: env_seconds("ADE_WORKER_POLL_INTERVAL", 1),
            poll_interval_max: env_seconds("ADE_WORKER_POLL_INTERVAL_MAX", 30),
            cleanup_interval: env_seconds("ADE_WORKER_CLEANUP_INTERVAL", 30),
            gc_interval: env_optional_seconds("ADE_WORKER_GC_INTERVAL_SECONDS", Some(3600)),
            env_ttl_days: env_i64("ADE_WORKER_ENV_TTL_DAYS", 30),
            run_artifact_ttl_days: env_optional_i64("ADE_WORKER_RUN_ARTIFACT_TTL_DAYS", None),
        })
    }

    /// Heartbeat cadence stays at or below lease/3, per spec.md §5's
    /// cancellation-and-timeouts guarantee.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.lease_seconds / 3).max(1) as u64)
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .clamp(1, 4)
}

fn require_env(key: &str) -> ade_core::Result<String> {
    std::env::var(key)
        .map_err(|_| ade_core::Error::Internal(format!("{key} is required")))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_optional_i64(key: &str, default: Option<i64>) -> Option<i64> {
    match std::env::var(key) {
        Ok(v) if v.is_empty() => None,
        Ok(v) => v.parse().ok(),
        Err(_) => default,
    }
}

fn env_seconds(key: &str, default: u64) -> Duration {
    Duration::from_secs(std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
}

fn env_optional_seconds(key: &str, default: Option<u64>) -> Option<Duration> {
    match std::env::var(key) {
        Ok(v) if v.is_empty() => None,
        Ok(v) => v.parse().ok().map(Duration::from_secs),
        Err(_) => default.map(Duration::from_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_at_most_a_third_of_the_lease() {
        let mut settings = bare_settings();
        settings.lease_seconds = 30;
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn heartbeat_never_goes_to_zero() {
        let mut settings = bare_settings();
        settings.lease_seconds = 1;
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(1));
    }

    fn bare_settings() -> WorkerSettings {
        WorkerSettings {
            database_url: "postgres://localhost/ade".into(),
            workspaces_dir: PathBuf::from("/tmp/workspaces"),
            venvs_dir: PathBuf::from("/tmp/venvs"),
            pip_cache_dir: PathBuf::from("/tmp/pip"),
            blob_root: PathBuf::from("/tmp/blobs"),
            engine_spec: "ade-engine".into(),
            run_timeout: Duration::from_secs(300),
            build_timeout: Duration::from_secs(600),
            concurrency: 2,
            lease_seconds: 60,
            max_attempts: 3,
            backoff_base_seconds: 5,
            backoff_max_seconds: 300,
            poll_interval: Duration::from_secs(1),
            poll_interval_max: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(30),
            gc_interval: Some(Duration::from_secs(3600)),
            env_ttl_days: 30,
            run_artifact_ttl_days: None,
        }
    }
}
