use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use ade_storage::model::User;

use crate::auth::session;
use crate::auth::{AuthSource, AuthenticatedPrincipal};
use crate::error::ApiError;
use crate::state::AppState;

/// Minimal session-issuing endpoint. Full SSO/OIDC is out of scope (see
/// spec.md's Non-goals); this assumes identity has already been verified
/// upstream (an authenticating proxy, or a provisioning script) and the
/// caller is simply exchanging a known, already-provisioned email for a
/// session. See DESIGN.md's Open Question decision on this point.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE email = $1"#)
        .bind(&request.email)
        .fetch_optional(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    let Some(user) = user else {
        return Err(ApiError::unauthorized("unknown user"));
    };

    let session = session::create(&state.pool, &state.settings, user.id).await?;
    let (session_cookie, csrf_cookie) = session::cookies_for(&state.settings, &session);

    let body = Json(SessionResponse {
        user_id: user.id.to_string(),
        email: user.email,
    });
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.append(SET_COOKIE, session_cookie.encoded().to_string().parse().map_err(|_| {
        ApiError::new(ade_core::ProblemType::Internal, "failed to encode session cookie")
    })?);
    headers.append(SET_COOKIE, csrf_cookie.encoded().to_string().parse().map_err(|_| {
        ApiError::new(ade_core::ProblemType::Internal, "failed to encode csrf cookie")
    })?);
    Ok(response)
}

pub async fn logout(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Response, ApiError> {
    if let AuthSource::Session(session_id) = principal.source {
        session::revoke(&state.pool, session_id).await?;
    }

    let (session_cookie, csrf_cookie) = session::expired_cookies(&state.settings);
    let mut response = axum::http::StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.append(SET_COOKIE, session_cookie.encoded().to_string().parse().map_err(|_| {
        ApiError::new(ade_core::ProblemType::Internal, "failed to encode session cookie")
    })?);
    headers.append(SET_COOKIE, csrf_cookie.encoded().to_string().parse().map_err(|_| {
        ApiError::new(ade_core::ProblemType::Internal, "failed to encode csrf cookie")
    })?);
    Ok(response)
}
