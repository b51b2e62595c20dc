//! The control-plane HTTP surface: session/API-key auth, RBAC, and the
//! configuration/document/run endpoints, built on axum.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod error;
pub mod routes;
pub mod settings;
pub mod state;

pub use error::ApiError;
pub use settings::ApiSettings;
pub use state::AppState;

use axum::middleware;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full axum `Router`, wired with tracing, permissive CORS
/// (the control plane is expected to sit behind an authenticating proxy or
/// be called same-origin; narrow this in production) and the
/// credential-resolution middleware every route relies on via
/// [`auth::AuthenticatedPrincipal`].
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth::resolve_principal))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
