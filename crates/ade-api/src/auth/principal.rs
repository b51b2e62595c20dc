use std::collections::{HashMap, HashSet};

use ade_core::{ApiKeyId, SessionId, UserId, WorkspaceId};

/// Which credential resolved this request. Kept distinct from the
/// permission set itself because API keys carry their own `scopes` column
/// rather than going through role assignments (see `ade_api/core/auth`'s
/// split handling of `X-API-Key` vs. session cookie).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    Session(SessionId),
    ApiKey(ApiKeyId),
}

/// The authenticated caller for one request, with enough permission
/// information to answer `has_permission` without another DB round trip
/// per route.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Option<UserId>,
    pub source: AuthSource,
    pub is_global_admin: bool,
    pub global_permissions: HashSet<String>,
    pub workspace_permissions: HashMap<WorkspaceId, HashSet<String>>,
    /// Set only for `AuthSource::Session`; compared against `X-CSRF-Token`
    /// by [`super::session::csrf_matches`] for mutating requests.
    pub csrf_token: Option<String>,
}

impl Principal {
    pub fn has_permission(&self, workspace_id: WorkspaceId, permission: &str) -> bool {
        if self.is_global_admin || self.global_permissions.contains(permission) {
            return true;
        }
        self.workspace_permissions
            .get(&workspace_id)
            .map(|perms| perms.contains(permission))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(is_global_admin: bool) -> Principal {
        Principal {
            user_id: Some(UserId::new()),
            source: AuthSource::Session(SessionId::new()),
            is_global_admin,
            global_permissions: HashSet::new(),
            workspace_permissions: HashMap::new(),
            csrf_token: Some("token".into()),
        }
    }

    #[test]
    fn global_admin_has_every_permission() {
        let principal = principal(true);
        assert!(principal.has_permission(WorkspaceId::new(), "anything.at.all"));
    }

    #[test]
    fn global_permission_applies_to_every_workspace() {
        let mut principal = principal(false);
        principal.global_permissions.insert("configurations.manage".into());
        assert!(principal.has_permission(WorkspaceId::new(), "configurations.manage"));
        assert!(!principal.has_permission(WorkspaceId::new(), "runs.submit"));
    }

    #[test]
    fn workspace_permission_does_not_leak_to_other_workspaces() {
        let workspace_id = WorkspaceId::new();
        let other_workspace_id = WorkspaceId::new();
        let mut principal = principal(false);
        principal
            .workspace_permissions
            .entry(workspace_id)
            .or_default()
            .insert("documents.write".into());

        assert!(principal.has_permission(workspace_id, "documents.write"));
        assert!(!principal.has_permission(other_workspace_id, "documents.write"));
    }

    #[test]
    fn missing_permission_is_denied() {
        let principal = principal(false);
        assert!(!principal.has_permission(WorkspaceId::new(), "runs.submit"));
    }
}
