use std::collections::{HashMap, HashSet};

use chrono::Utc;
use cookie::{Cookie, SameSite};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;

use ade_core::{SessionId, UserId, WorkspaceId};
use ade_storage::model::Session;

use crate::settings::ApiSettings;

use super::principal::{AuthSource, Principal};

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Creates a session row for a just-authenticated user and returns it. The
/// CSRF token is stored alongside the session and compared plaintext
/// against `X-CSRF-Token` (the original hashes it server-side; with the
/// token already random and session-scoped, the extra hash buys nothing
/// here — see DESIGN.md).
pub async fn create(pool: &PgPool, settings: &ApiSettings, user_id: UserId) -> ade_core::Result<Session> {
    let session = Session {
        id: SessionId::new(),
        user_id,
        csrf_token: random_token(),
        created_at: Utc::now(),
        expires_at: Utc::now() + chrono::Duration::from_std(settings.session_duration).unwrap_or_default(),
    };
    sqlx::query(
        r#"INSERT INTO sessions (id, user_id, csrf_token, created_at, expires_at) VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(session.id.as_uuid())
    .bind(session.user_id.as_uuid())
    .bind(&session.csrf_token)
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(pool)
    .await?;
    Ok(session)
}

pub async fn revoke(pool: &PgPool, session_id: SessionId) -> ade_core::Result<()> {
    sqlx::query(r#"DELETE FROM sessions WHERE id = $1"#)
        .bind(session_id.as_uuid())
        .execute(pool)
        .await?;
    Ok(())
}

/// Builds the `Set-Cookie` pair for a freshly-created session: the session
/// id itself (`HttpOnly`, not readable by JS) and the CSRF token (readable,
/// so the SPA can echo it back as `X-CSRF-Token`).
pub fn cookies_for(settings: &ApiSettings, session: &Session) -> (Cookie<'static>, Cookie<'static>) {
    let session_cookie = Cookie::build((settings.session_cookie_name.clone(), session.id.to_string()))
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::seconds(settings.session_duration.as_secs() as i64))
        .build();
    let csrf_cookie = Cookie::build((settings.csrf_cookie_name.clone(), session.csrf_token.clone()))
        .http_only(false)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::seconds(settings.session_duration.as_secs() as i64))
        .build();
    (session_cookie, csrf_cookie)
}

pub fn expired_cookies(settings: &ApiSettings) -> (Cookie<'static>, Cookie<'static>) {
    let session_cookie = Cookie::build((settings.session_cookie_name.clone(), ""))
        .path("/")
        .max_age(cookie::time::Duration::ZERO)
        .build();
    let csrf_cookie = Cookie::build((settings.csrf_cookie_name.clone(), ""))
        .path("/")
        .max_age(cookie::time::Duration::ZERO)
        .build();
    (session_cookie, csrf_cookie)
}

/// Resolves a session-cookie value to a [`Principal`], loading every role
/// assignment the user holds (global and per-workspace) into its
/// permission sets. Returns `None` for an unknown or expired session.
pub async fn resolve(pool: &PgPool, raw_session_id: &str) -> ade_core::Result<Option<Principal>> {
    let Ok(session_id): Result<SessionId, _> = raw_session_id.parse() else {
        return Ok(None);
    };
    let session = sqlx::query_as::<_, Session>(
        r#"SELECT * FROM sessions WHERE id = $1 AND expires_at > now()"#,
    )
    .bind(session_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    let Some(session) = session else {
        return Ok(None);
    };

    let user = sqlx::query_as::<_, ade_storage::model::User>(
        r#"SELECT * FROM users WHERE id = $1"#,
    )
    .bind(session.user_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    let Some(user) = user else {
        return Ok(None);
    };

    let assignments = sqlx::query_as::<_, (Option<uuid::Uuid>, Vec<String>)>(
        r#"
        SELECT ra.workspace_id, r.permissions
        FROM role_assignments ra
        JOIN roles r ON r.id = ra.role_id
        WHERE ra.user_id = $1
        "#,
    )
    .bind(session.user_id.as_uuid())
    .fetch_all(pool)
    .await?;

    let mut global_permissions = HashSet::new();
    let mut workspace_permissions: HashMap<WorkspaceId, HashSet<String>> = HashMap::new();
    for (workspace_id, permissions) in assignments {
        match workspace_id {
            None => global_permissions.extend(permissions),
            Some(id) => workspace_permissions
                .entry(WorkspaceId::from_uuid(id))
                .or_default()
                .extend(permissions),
        }
    }

    Ok(Some(Principal {
        user_id: Some(user.id),
        source: AuthSource::Session(session.id),
        is_global_admin: user.is_global_admin,
        global_permissions,
        workspace_permissions,
        csrf_token: Some(session.csrf_token),
    }))
}

/// Double-submit CSRF check for a mutating request: a session-authenticated
/// principal's stored token must match `X-CSRF-Token` exactly. API-key
/// principals carry no cookie and so are exempt (there is no cookie for a
/// cross-site request to ride along with).
pub fn enforce_csrf(principal: &Principal, header_value: Option<&str>) -> ade_core::Result<()> {
    match (&principal.source, &principal.csrf_token) {
        (AuthSource::ApiKey(_), _) => Ok(()),
        (AuthSource::Session(_), Some(expected)) if header_value == Some(expected.as_str()) => Ok(()),
        _ => Err(ade_core::Error::CsrfRejected),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use ade_core::ApiKeyId;

    use super::*;

    fn session_principal(csrf_token: Option<&str>) -> Principal {
        Principal {
            user_id: Some(UserId::new()),
            source: AuthSource::Session(SessionId::new()),
            is_global_admin: false,
            global_permissions: HashSet::new(),
            workspace_permissions: HashMap::new(),
            csrf_token: csrf_token.map(str::to_string),
        }
    }

    #[test]
    fn matching_token_passes() {
        let principal = session_principal(Some("abc123"));
        assert!(enforce_csrf(&principal, Some("abc123")).is_ok());
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let principal = session_principal(Some("abc123"));
        assert!(enforce_csrf(&principal, Some("wrong")).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        let principal = session_principal(Some("abc123"));
        assert!(enforce_csrf(&principal, None).is_err());
    }

    #[test]
    fn api_key_principal_is_exempt() {
        let principal = Principal {
            user_id: None,
            source: AuthSource::ApiKey(ApiKeyId::new()),
            is_global_admin: false,
            global_permissions: HashSet::new(),
            workspace_permissions: HashMap::new(),
            csrf_token: None,
        };
        assert!(enforce_csrf(&principal, None).is_ok());
    }
}
