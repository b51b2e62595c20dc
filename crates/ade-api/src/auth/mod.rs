pub mod api_key;
pub mod principal;
pub mod rbac;
pub mod session;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

pub use principal::{AuthSource, Principal};
pub use rbac::{require_permission, AuthenticatedPrincipal};
pub use session::enforce_csrf;

use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// Resolves the caller's [`Principal`] (API key first, then session
/// cookie, matching `authenticate_request`'s precedence) and stores it in
/// request extensions. Leaves it absent for an anonymous caller; routes
/// that require auth pull it out via [`AuthenticatedPrincipal`], which
/// rejects with 401 when nothing was resolved.
pub async fn resolve_principal(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let principal = match resolve(&state, &request).await {
        Ok(principal) => principal,
        Err(err) => {
            use axum::response::IntoResponse;
            return crate::error::ApiError::from(err).into_response();
        }
    };
    if let Some(principal) = principal {
        request.extensions_mut().insert(principal);
    }
    next.run(request).await
}

async fn resolve(state: &AppState, request: &Request<Body>) -> ade_core::Result<Option<Principal>> {
    if let Some(key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(principal) = api_key::resolve(&state.pool, key).await? {
            return Ok(Some(principal));
        }
    }

    if let Some(cookie_header) = request.headers().get(http::header::COOKIE).and_then(|v| v.to_str().ok()) {
        if let Some(session_id) = find_cookie(cookie_header, &state.settings.session_cookie_name) {
            return session::resolve(&state.pool, &session_id).await;
        }
    }

    Ok(None)
}

fn find_cookie(header_value: &str, name: &str) -> Option<String> {
    cookie::Cookie::split_parse(header_value)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_cookie_among_several() {
        let header = "ade_csrf=abc; ade_session=the-session-id; other=1";
        assert_eq!(
            find_cookie(header, "ade_session"),
            Some("the-session-id".to_string())
        );
    }

    #[test]
    fn missing_cookie_is_none() {
        let header = "ade_csrf=abc";
        assert_eq!(find_cookie(header, "ade_session"), None);
    }
}
