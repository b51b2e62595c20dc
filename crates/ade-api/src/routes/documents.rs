use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use ade_core::{DocumentId, WorkspaceId};
use ade_storage::model::{Document, DocumentStatus};

use crate::auth::{enforce_csrf, require_permission, AuthenticatedPrincipal};
use crate::error::ApiError;
use crate::state::AppState;

const PERMISSION: &str = "documents.write";

/// Streams the uploaded multipart body to a temp file while hashing it, so
/// a 256 MiB upload never lives fully in memory before `BlobAdapter::upload_path`
/// takes over.
pub async fn upload(
    State(state): State<AppState>,
    Path(workspace_id): Path<WorkspaceId>,
    headers: HeaderMap,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    mut multipart: Multipart,
) -> Result<Json<Document>, ApiError> {
    require_permission(&principal, workspace_id, PERMISSION)?;
    enforce_csrf(&principal, headers.get("x-csrf-token").and_then(|v| v.to_str().ok()))?;

    let mut filename = None;
    let mut content_type = None;
    let mut staged: Option<(tokio::fs::File, std::path::PathBuf)> = None;
    let mut hasher = Sha256::new();
    let mut byte_size: u64 = 0;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(ade_core::ProblemType::InvalidSourceShape, err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        filename = field.file_name().map(str::to_string);
        content_type = field.content_type().map(str::to_string);

        let staging_path = std::env::temp_dir().join(format!("ade-upload-{}", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&staging_path)
            .await
            .map_err(ade_core::Error::from)?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| ApiError::new(ade_core::ProblemType::InvalidSourceShape, err.to_string()))?
        {
            byte_size += chunk.len() as u64;
            if byte_size > state.settings.document_max_bytes {
                return Err(ApiError::new(
                    ade_core::ProblemType::FileTooLarge,
                    format!("document exceeds {} bytes", state.settings.document_max_bytes),
                ));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(ade_core::Error::from)?;
        }
        file.flush().await.map_err(ade_core::Error::from)?;
        staged = Some((file, staging_path));
    }

    let Some((_file, staging_path)) = staged else {
        return Err(ApiError::new(ade_core::ProblemType::InvalidSourceShape, "missing file field"));
    };
    let filename = filename.unwrap_or_else(|| "upload".to_string());
    let sha256 = hex::encode(hasher.finalize());

    let document_id = DocumentId::new();
    let blob_name = format!("{workspace_id}/{document_id}/{filename}");
    let receipt = state
        .blobs
        .upload_path(&blob_name, &staging_path, Some(state.settings.document_max_bytes))
        .await;
    let _ = tokio::fs::remove_file(&staging_path).await;
    let receipt = receipt?;

    let document = Document {
        id: document_id,
        workspace_id,
        filename,
        content_type,
        byte_size: receipt.byte_size as i64,
        sha256,
        blob_name: receipt.blob_name,
        status: DocumentStatus::Uploaded,
        created_at: chrono::Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO documents (id, workspace_id, filename, content_type, byte_size, sha256, blob_name, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(document.id.as_uuid())
    .bind(document.workspace_id.as_uuid())
    .bind(&document.filename)
    .bind(&document.content_type)
    .bind(document.byte_size)
    .bind(&document.sha256)
    .bind(&document.blob_name)
    .bind(document.status)
    .bind(document.created_at)
    .execute(&state.pool)
    .await
    .map_err(ade_core::Error::from)?;

    Ok(Json(document))
}
