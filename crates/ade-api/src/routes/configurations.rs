use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use ade_config::{FileListing, ListDepth, ListFilesQuery, SortKey, SortOrder};
use ade_core::{ConfigurationId, WorkspaceId};
use ade_storage::model::{Configuration, ConfigurationSourceKind, ConfigurationStatus};

use crate::auth::{enforce_csrf, require_permission, AuthenticatedPrincipal};
use crate::error::ApiError;
use crate::state::AppState;

const PERMISSION: &str = "configurations.manage";

fn csrf_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-csrf-token").and_then(|v| v.to_str().ok())
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub source_kind: ConfigurationSourceKind,
    pub template_name: Option<String>,
    pub source_configuration_id: Option<ConfigurationId>,
    pub engine_spec: String,
}

pub async fn create(
    State(state): State<AppState>,
    Path(workspace_id): Path<WorkspaceId>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Configuration>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;

    let configuration = Configuration {
        id: ConfigurationId::new(),
        workspace_id,
        name: request.name,
        status: ConfigurationStatus::Draft,
        source_kind: request.source_kind,
        source_configuration_id: request.source_configuration_id,
        notes: None,
        engine_spec: request.engine_spec,
        content_digest: String::new(),
        dependency_digest: String::new(),
        published_digest: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        activated_at: None,
        archived_at: None,
    };

    match request.source_kind {
        ConfigurationSourceKind::Clone => {
            let Some(source_id) = configuration.source_configuration_id else {
                return Err(ApiError::new(
                    ade_core::ProblemType::InvalidSourceShape,
                    "clone requires source_configuration_id",
                ));
            };
            state
                .config_storage
                .clone_configuration(workspace_id, source_id, configuration.id)
                .await?;
        }
        ConfigurationSourceKind::Template => {
            let template_root = state
                .paths
                .workspace_root(workspace_id)?
                .join("templates")
                .join(request.template_name.as_deref().unwrap_or("default"));
            state
                .config_storage
                .materialize_from_template(workspace_id, configuration.id, &template_root)
                .await?;
        }
        ConfigurationSourceKind::Archive | ConfigurationSourceKind::Github => {
            return Err(ApiError::new(
                ade_core::ProblemType::InvalidSourceShape,
                "use /configurations/import for archive or github sources",
            ));
        }
    }

    insert_configuration(&state, &configuration).await?;
    Ok(Json(configuration))
}

pub async fn import(
    State(state): State<AppState>,
    Path(workspace_id): Path<WorkspaceId>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    mut multipart: Multipart,
) -> Result<Json<Configuration>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;

    let mut name = None;
    let mut engine_spec = None;
    let mut archive_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(ade_core::ProblemType::InvalidArchive, err.to_string()))?
    {
        match field.name() {
            Some("name") => {
                name = Some(field.text().await.map_err(multipart_err)?);
            }
            Some("engine_spec") => {
                engine_spec = Some(field.text().await.map_err(multipart_err)?);
            }
            Some("archive") => {
                archive_bytes = Some(field.bytes().await.map_err(multipart_err)?.to_vec());
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| ApiError::new(ade_core::ProblemType::InvalidSourceShape, "missing name"))?;
    let engine_spec = engine_spec
        .ok_or_else(|| ApiError::new(ade_core::ProblemType::InvalidSourceShape, "missing engine_spec"))?;
    let archive_bytes =
        archive_bytes.ok_or_else(|| ApiError::new(ade_core::ProblemType::InvalidSourceShape, "missing archive"))?;

    let configuration = Configuration {
        id: ConfigurationId::new(),
        workspace_id,
        name,
        status: ConfigurationStatus::Draft,
        source_kind: ConfigurationSourceKind::Archive,
        source_configuration_id: None,
        notes: None,
        engine_spec,
        content_digest: String::new(),
        dependency_digest: String::new(),
        published_digest: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        activated_at: None,
        archived_at: None,
    };

    state
        .config_storage
        .import_archive(workspace_id, configuration.id, archive_bytes)
        .await?;
    insert_configuration(&state, &configuration).await?;
    Ok(Json(configuration))
}

fn multipart_err(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::new(ade_core::ProblemType::InvalidArchive, err.to_string())
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub content_digest: String,
    pub dependency_digest: String,
}

pub async fn validate(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id)): Path<(WorkspaceId, ConfigurationId)>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<ValidateResponse>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;

    state.config_storage.validate(workspace_id, configuration_id).await?;
    let content_digest = state.config_storage.content_digest(workspace_id, configuration_id).await?;
    let dependency_digest = state
        .config_storage
        .dependency_digest(workspace_id, configuration_id)
        .await?;

    sqlx::query(
        r#"UPDATE configurations SET content_digest = $3, dependency_digest = $4, updated_at = now()
           WHERE id = $1 AND workspace_id = $2"#,
    )
    .bind(configuration_id.as_uuid())
    .bind(workspace_id.as_uuid())
    .bind(&content_digest)
    .bind(&dependency_digest)
    .execute(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;

    Ok(Json(ValidateResponse {
        content_digest,
        dependency_digest,
    }))
}

/// Makes `configuration_id` the workspace's active configuration, archiving
/// whatever was previously active in the same transaction (spec.md §3's
/// "at most one active configuration per workspace" invariant).
pub async fn publish(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id)): Path<(WorkspaceId, ConfigurationId)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Configuration>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;

    let mut tx = state.pool.begin().await.map_err(ade_core::Error::from)?;

    let current = sqlx::query_as::<_, Configuration>(
        r#"SELECT * FROM configurations WHERE id = $1 AND workspace_id = $2 FOR UPDATE"#,
    )
    .bind(configuration_id.as_uuid())
    .bind(workspace_id.as_uuid())
    .fetch_optional(&mut *tx)
    .await
    .map_err(ade_core::Error::from)?;
    let Some(current) = current else {
        return Err(ApiError::new(ade_core::ProblemType::NotFound, "configuration not found"));
    };
    if current.status != ConfigurationStatus::Draft {
        return Err(ApiError::new(
            ade_core::ProblemType::PublishConflict,
            "only a draft configuration can be published",
        ));
    }

    sqlx::query(
        r#"UPDATE configurations SET status = 'archived', archived_at = now(), updated_at = now()
           WHERE workspace_id = $1 AND status = 'active'"#,
    )
    .bind(workspace_id.as_uuid())
    .execute(&mut *tx)
    .await
    .map_err(ade_core::Error::from)?;

    let published = sqlx::query_as::<_, Configuration>(
        r#"UPDATE configurations
           SET status = 'active', published_digest = content_digest, activated_at = now(), updated_at = now()
           WHERE id = $1
           RETURNING *"#,
    )
    .bind(configuration_id.as_uuid())
    .fetch_one(&mut *tx)
    .await
    .map_err(ade_core::Error::from)?;

    tx.commit().await.map_err(ade_core::Error::from)?;
    Ok(Json(published))
}

pub async fn put_file(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id, path)): Path<(WorkspaceId, ConfigurationId, String)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;

    ensure_draft(&state, workspace_id, configuration_id).await?;

    let if_match = headers.get("if-match").and_then(|v| v.to_str().ok());
    let etag = state
        .config_storage
        .write_file(workspace_id, configuration_id, &path, &body, if_match)
        .await?;
    Ok(Json(serde_json::json!({ "etag": etag })))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id, path)): Path<(WorkspaceId, ConfigurationId, String)>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<([(&'static str, String); 1], axum::body::Bytes), ApiError> {
    require_permission(&principal, workspace_id, "runs.read")?;
    let (bytes, etag) = state.config_storage.read_file(workspace_id, configuration_id, &path).await?;
    Ok(([("etag", etag)], axum::body::Bytes::from(bytes)))
}

async fn ensure_draft(
    state: &AppState,
    workspace_id: WorkspaceId,
    configuration_id: ConfigurationId,
) -> Result<(), ApiError> {
    let status = sqlx::query_as::<_, (ConfigurationStatus,)>(
        r#"SELECT status FROM configurations WHERE id = $1 AND workspace_id = $2"#,
    )
    .bind(configuration_id.as_uuid())
    .bind(workspace_id.as_uuid())
    .fetch_optional(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;
    match status {
        Some((ConfigurationStatus::Draft,)) => Ok(()),
        Some(_) => Err(ApiError::new(
            ade_core::ProblemType::ConfigurationNotEditable,
            "only a draft configuration can be edited",
        )),
        None => Err(ApiError::new(ade_core::ProblemType::NotFound, "configuration not found")),
    }
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id, path)): Path<(WorkspaceId, ConfigurationId, String)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<axum::http::StatusCode, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;
    ensure_draft(&state, workspace_id, configuration_id).await?;

    let if_match = headers
        .get("if-match")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(ade_core::ProblemType::PreconditionRequired, "If-Match header is required"))?;
    state
        .config_storage
        .delete_file(workspace_id, configuration_id, &path, if_match)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
    pub dest_if_match: Option<String>,
}

pub async fn rename_file(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id)): Path<(WorkspaceId, ConfigurationId)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<RenameRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;
    ensure_draft(&state, workspace_id, configuration_id).await?;

    state
        .config_storage
        .rename_file(
            workspace_id,
            configuration_id,
            &request.from,
            &request.to,
            request.dest_if_match.as_deref(),
        )
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn create_directory(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id, path)): Path<(WorkspaceId, ConfigurationId, String)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<axum::http::StatusCode, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;
    ensure_draft(&state, workspace_id, configuration_id).await?;
    state.config_storage.create_directory(workspace_id, configuration_id, &path).await?;
    Ok(axum::http::StatusCode::CREATED)
}

pub async fn delete_directory(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id, path)): Path<(WorkspaceId, ConfigurationId, String)>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<axum::http::StatusCode, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, csrf_header(&headers))?;
    ensure_draft(&state, workspace_id, configuration_id).await?;
    state.config_storage.delete_directory(workspace_id, configuration_id, &path).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Query-string shape for `GET .../file-list`. `include`/`exclude` are
/// comma-separated glob lists rather than repeated keys, since
/// `serde_urlencoded` (what axum's `Query` extractor uses) has no
/// standard convention for collecting repeated keys into a `Vec`.
#[derive(Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub depth: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub entries: Vec<ade_config::FileEntry>,
    pub next_cursor: Option<String>,
    pub fileset_hash: String,
}

pub async fn list_files(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id)): Path<(WorkspaceId, ConfigurationId)>,
    Query(params): Query<ListQuery>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<ListResponse>, ApiError> {
    require_permission(&principal, workspace_id, "runs.read")?;

    let depth = match params.depth.as_deref() {
        Some("0") => Some(ListDepth::Zero),
        Some("1") => Some(ListDepth::One),
        Some("infinity") => Some(ListDepth::Infinite),
        _ => None,
    };
    let sort = match params.sort.as_deref() {
        Some("name") => Some(SortKey::Name),
        Some("mtime") => Some(SortKey::Mtime),
        Some("size") => Some(SortKey::Size),
        Some("path") => Some(SortKey::Path),
        _ => None,
    };
    let order = match params.order.as_deref() {
        Some("desc") | Some("descending") => Some(SortOrder::Descending),
        Some("asc") | Some("ascending") => Some(SortOrder::Ascending),
        _ => None,
    };

    let split_patterns = |raw: Option<String>| {
        raw.map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let query = ListFilesQuery {
        prefix: params.prefix,
        depth,
        include: split_patterns(params.include),
        exclude: split_patterns(params.exclude),
        limit: params.limit.unwrap_or(1000),
        cursor: params.cursor,
        sort,
        order,
    };
    let FileListing { entries, next_cursor, fileset_hash } =
        state.config_storage.list_files(workspace_id, configuration_id, &query).await?;
    Ok(Json(ListResponse { entries, next_cursor, fileset_hash }))
}

pub async fn export(
    State(state): State<AppState>,
    Path((workspace_id, configuration_id)): Path<(WorkspaceId, ConfigurationId)>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<axum::body::Bytes, ApiError> {
    require_permission(&principal, workspace_id, "runs.read")?;
    let bytes = state.config_storage.export_zip(workspace_id, configuration_id).await?;
    Ok(axum::body::Bytes::from(bytes))
}

async fn insert_configuration(state: &AppState, configuration: &Configuration) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO configurations (id, workspace_id, name, status, source_kind, source_configuration_id,
                                     notes, engine_spec, content_digest, dependency_digest, published_digest,
                                     created_at, updated_at, activated_at, archived_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(configuration.id.as_uuid())
    .bind(configuration.workspace_id.as_uuid())
    .bind(&configuration.name)
    .bind(configuration.status)
    .bind(configuration.source_kind)
    .bind(configuration.source_configuration_id.map(|id| id.as_uuid()))
    .bind(&configuration.notes)
    .bind(&configuration.engine_spec)
    .bind(&configuration.content_digest)
    .bind(&configuration.dependency_digest)
    .bind(&configuration.published_digest)
    .bind(configuration.created_at)
    .bind(configuration.updated_at)
    .bind(configuration.activated_at)
    .bind(configuration.archived_at)
    .execute(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;
    Ok(())
}
