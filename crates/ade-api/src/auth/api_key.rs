use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use sqlx::PgPool;

use ade_storage::model::ApiKey;

use super::principal::{AuthSource, Principal};

/// Hashes a raw API key the same way keys are stored (`sha256:<hex>`),
/// so lookups never compare plaintext keys to the database.
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Resolves an `X-API-Key` header value to a [`Principal`]. Returns `None`
/// for an unknown, revoked key rather than an error, so the caller can fall
/// back to cookie auth the same way `authenticate_request` tries both
/// credentials in order.
pub async fn resolve(pool: &PgPool, raw_key: &str) -> ade_core::Result<Option<Principal>> {
    let key_hash = hash_key(raw_key);
    let row = sqlx::query_as::<_, ApiKey>(
        r#"SELECT * FROM api_keys WHERE key_hash = $1 AND revoked_at IS NULL"#,
    )
    .bind(&key_hash)
    .fetch_optional(pool)
    .await?;

    let Some(key) = row else {
        return Ok(None);
    };

    sqlx::query(r#"UPDATE api_keys SET last_used_at = now() WHERE id = $1"#)
        .bind(key.id.as_uuid())
        .execute(pool)
        .await?;

    let scopes: HashSet<String> = key.scopes.into_iter().collect();
    let (global_permissions, workspace_permissions) = match key.workspace_id {
        None => (scopes, HashMap::new()),
        Some(workspace_id) => (HashSet::new(), HashMap::from([(workspace_id, scopes)])),
    };

    Ok(Some(Principal {
        user_id: None,
        source: AuthSource::ApiKey(key.id),
        is_global_admin: false,
        global_permissions,
        workspace_permissions,
        csrf_token: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_stable_and_prefixed() {
        let first = hash_key("ade_live_abc123");
        let second = hash_key("ade_live_abc123");
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));
        assert_eq!(first.len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_key_differs_for_different_inputs() {
        assert_ne!(hash_key("key-a"), hash_key("key-b"));
    }
}
