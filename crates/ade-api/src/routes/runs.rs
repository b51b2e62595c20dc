use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use ade_core::{ConfigurationId, DocumentId, RunId, WorkspaceId};
use ade_storage::model::{Run, RunField, RunMetrics, RunTableColumn};

use crate::auth::{enforce_csrf, require_permission, AuthenticatedPrincipal};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub configuration_id: ConfigurationId,
    pub document_id: DocumentId,
    #[serde(default)]
    pub options: Value,
}

pub async fn submit(
    State(state): State<AppState>,
    Path(workspace_id): Path<WorkspaceId>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<RunId>, ApiError> {
    require_permission(&principal, workspace_id, "runs.submit")?;
    enforce_csrf(&principal, headers.get("x-csrf-token").and_then(|v| v.to_str().ok()))?;

    let run_id = state
        .run_queue
        .enqueue(workspace_id, request.configuration_id, request.document_id, request.options, 3)
        .await?;
    Ok(Json(run_id))
}

#[derive(serde::Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub metrics: Option<RunMetrics>,
    pub fields: Vec<RunField>,
    pub table_columns: Vec<RunTableColumn>,
}

pub async fn read(
    State(state): State<AppState>,
    Path((workspace_id, run_id)): Path<(WorkspaceId, RunId)>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<RunDetail>, ApiError> {
    require_permission(&principal, workspace_id, "runs.read")?;

    let run = sqlx::query_as::<_, Run>(r#"SELECT * FROM runs WHERE id = $1 AND workspace_id = $2"#)
        .bind(run_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .fetch_optional(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    let Some(run) = run else {
        return Err(ApiError::new(ade_core::ProblemType::NotFound, "run not found"));
    };

    let metrics = sqlx::query_as::<_, RunMetrics>(r#"SELECT * FROM run_metrics WHERE run_id = $1"#)
        .bind(run_id.as_uuid())
        .fetch_optional(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    let fields = sqlx::query_as::<_, RunField>(r#"SELECT * FROM run_fields WHERE run_id = $1"#)
        .bind(run_id.as_uuid())
        .fetch_all(&state.pool)
        .await
        .map_err(ade_core::Error::from)?;
    let table_columns = sqlx::query_as::<_, RunTableColumn>(
        r#"SELECT * FROM run_table_columns WHERE run_id = $1 ORDER BY workbook_index, sheet_index, table_index, column_index"#,
    )
    .bind(run_id.as_uuid())
    .fetch_all(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;

    Ok(Json(RunDetail {
        run,
        metrics,
        fields,
        table_columns,
    }))
}
