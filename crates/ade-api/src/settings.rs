use std::net::SocketAddr;
use std::time::Duration;

/// API process configuration, loaded once from `ADE_*` environment
/// variables at process start. Ported from `ade_api/settings.py`'s
/// env-var-driven settings object.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub session_cookie_name: String,
    pub csrf_cookie_name: String,
    pub session_duration: Duration,
    pub config_import_max_bytes: u64,
    pub config_file_max_bytes: u64,
    pub document_max_bytes: u64,
    pub cookie_secure: bool,
}

impl ApiSettings {
    pub fn from_env() -> ade_core::Result<Self> {
        let database_url = require_env("ADE_DATABASE_URL")?;
        let bind_addr = env_string("ADE_API_BIND_ADDR", "0.0.0.0:8000")
            .parse()
            .map_err(|err| ade_core::Error::Internal(format!("invalid ADE_API_BIND_ADDR: {err}")))?;

        Ok(Self {
            database_url,
            bind_addr,
            session_cookie_name: env_string("ADE_SESSION_COOKIE_NAME", "ade_session"),
            csrf_cookie_name: env_string("ADE_CSRF_COOKIE_NAME", "ade_csrf"),
            session_duration: env_seconds("ADE_SESSION_DURATION_SECONDS", 12 * 3600),
            config_import_max_bytes: env_u64("ADE_CONFIG_IMPORT_MAX_BYTES", 64 * 1024 * 1024),
            config_file_max_bytes: env_u64("ADE_CONFIG_FILE_MAX_BYTES", 16 * 1024 * 1024),
            document_max_bytes: env_u64("ADE_DOCUMENT_MAX_BYTES", 256 * 1024 * 1024),
            cookie_secure: env_bool("ADE_COOKIE_SECURE", true),
        })
    }
}

fn require_env(key: &str) -> ade_core::Result<String> {
    std::env::var(key).map_err(|_| ade_core::Error::Internal(format!("{key} is required")))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_seconds(key: &str, default: u64) -> Duration {
    Duration::from_secs(std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
