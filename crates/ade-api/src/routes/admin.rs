use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ade_core::{UserId, WorkspaceId};
use ade_storage::model::{SystemSetting, User};

use crate::auth::{AuthenticatedPrincipal, Principal};
use crate::error::ApiError;
use crate::state::AppState;

/// Admin endpoints are gated on global-admin status rather than a
/// per-workspace permission key, since they manage cross-workspace state
/// (users, role assignments, operator tuning). Supplemented from
/// `original_source`'s `features/system_settings` and `features/users`,
/// which the distilled spec dropped.
fn require_global_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_global_admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("global admin required"))
    }
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub is_global_admin: bool,
}

pub async fn create_user(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    require_global_admin(&principal)?;

    let user = User {
        id: UserId::new(),
        email: request.email,
        display_name: request.display_name,
        is_global_admin: request.is_global_admin,
        created_at: chrono::Utc::now(),
    };
    sqlx::query(
        r#"INSERT INTO users (id, email, display_name, is_global_admin, created_at) VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(user.id.as_uuid())
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(user.is_global_admin)
    .bind(user.created_at)
    .execute(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;

    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Vec<User>>, ApiError> {
    require_global_admin(&principal)?;
    let users = sqlx::query_as::<_, User>(r#"SELECT * FROM users ORDER BY created_at"#)
        .fetch_all(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    Ok(Json(users))
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: uuid::Uuid,
    pub workspace_id: Option<WorkspaceId>,
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<AssignRoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_global_admin(&principal)?;

    sqlx::query(
        r#"
        INSERT INTO role_assignments (user_id, role_id, workspace_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id.as_uuid())
    .bind(request.role_id)
    .bind(request.workspace_id.map(|id| id.as_uuid()))
    .execute(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: Value,
}

pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<SystemSetting>, ApiError> {
    require_global_admin(&principal)?;
    let setting = sqlx::query_as::<_, SystemSetting>(r#"SELECT * FROM system_settings WHERE key = $1"#)
        .bind(&key)
        .fetch_optional(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    setting
        .map(Json)
        .ok_or_else(|| ApiError::new(ade_core::ProblemType::NotFound, format!("no setting named {key}")))
}

pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(value): Json<Value>,
) -> Result<Json<SystemSetting>, ApiError> {
    require_global_admin(&principal)?;
    let setting = sqlx::query_as::<_, SystemSetting>(
        r#"
        INSERT INTO system_settings (key, value, updated_at) VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        RETURNING *
        "#,
    )
    .bind(&key)
    .bind(&value)
    .fetch_one(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;
    Ok(Json(setting))
}
