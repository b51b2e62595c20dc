/// How the worker/API authenticate to Postgres. Mirrors the original
/// deployment's two modes: a static connection URL, or a short-lived access
/// token fetched from a managed-identity provider and swapped into the
/// connection string's password slot before each pool reconnect.
#[derive(Debug, Clone)]
pub enum DbAuthMode {
    StaticUrl(String),
    ManagedIdentity {
        host: String,
        port: u16,
        database: String,
        user: String,
        token_endpoint: String,
    },
}

impl DbAuthMode {
    /// Resolves the current connection URL. For `StaticUrl` this is
    /// immediate; for `ManagedIdentity` the caller must fetch a fresh token
    /// from `token_endpoint` and build the URL before each new connection,
    /// since tokens are short-lived and pooled connections may be recycled.
    pub fn static_url(&self) -> Option<&str> {
        match self {
            DbAuthMode::StaticUrl(url) => Some(url),
            DbAuthMode::ManagedIdentity { .. } => None,
        }
    }

    pub fn build_url(&self, token: &str) -> String {
        match self {
            DbAuthMode::StaticUrl(url) => url.clone(),
            DbAuthMode::ManagedIdentity {
                host,
                port,
                database,
                user,
                ..
            } => {
                format!("postgres://{user}:{token}@{host}:{port}/{database}?sslmode=require")
            }
        }
    }
}
