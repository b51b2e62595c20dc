use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use ade_core::WorkspaceId;

use crate::error::ApiError;
use crate::state::AppState;

use super::principal::Principal;

/// Extracts the [`Principal`] that [`super::resolve_principal`] stashed in
/// request extensions. Rejects with 401 when the request carried no
/// recognized credential, so handlers that need auth just take this as a
/// parameter instead of checking for `None` themselves.
pub struct AuthenticatedPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedPrincipal)
            .ok_or_else(|| ApiError::unauthorized("no valid session or API key was presented"))
    }
}

/// Enforces that `principal` carries `permission` in `workspace_id`,
/// matching the `permissions` column in spec.md §6's auth table
/// (`configurations.manage`, `documents.write`, `runs.submit`, `runs.read`).
pub fn require_permission(
    principal: &Principal,
    workspace_id: WorkspaceId,
    permission: &str,
) -> Result<(), ApiError> {
    if principal.has_permission(workspace_id, permission) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "missing permission {permission} for this workspace"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::super::{AuthSource, Principal};
    use super::*;
    use ade_core::SessionId;

    #[test]
    fn granted_permission_passes() {
        let workspace_id = WorkspaceId::new();
        let mut permissions = HashSet::new();
        permissions.insert("runs.submit".to_string());
        let principal = Principal {
            user_id: None,
            source: AuthSource::Session(SessionId::new()),
            is_global_admin: false,
            global_permissions: HashSet::new(),
            workspace_permissions: HashMap::from([(workspace_id, permissions)]),
            csrf_token: None,
        };
        assert!(require_permission(&principal, workspace_id, "runs.submit").is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let principal = Principal {
            user_id: None,
            source: AuthSource::Session(SessionId::new()),
            is_global_admin: false,
            global_permissions: HashSet::new(),
            workspace_permissions: HashMap::new(),
            csrf_token: None,
        };
        assert!(require_permission(&principal, WorkspaceId::new(), "runs.submit").is_err());
    }
}
