use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ade_core::{
    ApiKeyId, ConfigurationId, DocumentId, EnvironmentId, RunId, SessionId, UserId, WorkspaceId,
};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationSourceKind {
    Template,
    Clone,
    Archive,
    Github,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Configuration {
    pub id: ConfigurationId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: ConfigurationStatus,
    pub source_kind: ConfigurationSourceKind,
    pub source_configuration_id: Option<ConfigurationId>,
    pub notes: Option<String>,
    pub engine_spec: String,
    pub content_digest: String,
    pub dependency_digest: String,
    pub published_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

/// `sha256:<hex>` digest, computed over sorted, path-prefixed,
/// NUL-separated file bytes. See `ade_config::digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest(pub String);

impl ContentDigest {
    pub fn as_etag(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub filename: String,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub sha256: String,
    pub blob_name: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Queued,
    Building,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Environment {
    pub id: EnvironmentId,
    pub workspace_id: WorkspaceId,
    pub configuration_id: ConfigurationId,
    pub engine_spec: String,
    pub dependency_digest: String,
    pub status: EnvironmentStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub leased_until: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub python_interpreter: Option<String>,
    pub python_version: Option<String>,
    pub engine_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
    pub id: RunId,
    pub workspace_id: WorkspaceId,
    pub configuration_id: ConfigurationId,
    pub document_id: DocumentId,
    pub environment_id: Option<EnvironmentId>,
    pub status: RunStatus,
    pub options: Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub leased_until: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Scalar metrics parsed out of `engine.run.completed` (§4.7.1). Every field
/// is independently optional: a missing or malformed scalar in the payload
/// drops just that field, never the row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunMetrics {
    pub run_id: RunId,
    pub evaluation_outcome: Option<String>,
    pub evaluation_findings_total: Option<i64>,
    pub evaluation_findings_info: Option<i64>,
    pub evaluation_findings_warning: Option<i64>,
    pub evaluation_findings_error: Option<i64>,
    pub validation_issues_total: Option<i64>,
    pub validation_issues_info: Option<i64>,
    pub validation_issues_warning: Option<i64>,
    pub validation_issues_error: Option<i64>,
    pub validation_max_severity: Option<String>,
    pub workbook_count: Option<i64>,
    pub sheet_count: Option<i64>,
    pub table_count: Option<i64>,
    pub row_count_total: Option<i64>,
    pub row_count_empty: Option<i64>,
    pub column_count_total: Option<i64>,
    pub column_count_empty: Option<i64>,
    pub column_count_mapped: Option<i64>,
    pub column_count_unmapped: Option<i64>,
    pub field_count_expected: Option<i64>,
    pub field_count_detected: Option<i64>,
    pub field_count_not_detected: Option<i64>,
    pub cell_count_total: Option<i64>,
    pub cell_count_non_empty: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunField {
    pub run_id: RunId,
    pub field: String,
    pub label: Option<String>,
    pub detected: bool,
    pub best_mapping_score: Option<f64>,
    pub occurrences_tables: i64,
    pub occurrences_columns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    Mapped,
    Unmapped,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunTableColumn {
    pub run_id: RunId,
    pub workbook_index: i64,
    pub workbook_name: String,
    pub sheet_index: i64,
    pub sheet_name: String,
    pub table_index: i64,
    pub column_index: i64,
    pub header_raw: Option<String>,
    pub header_normalized: Option<String>,
    pub non_empty_cells: i64,
    pub mapping_status: MappingStatus,
    pub mapped_field: Option<String>,
    pub mapping_score: Option<f64>,
    pub mapping_method: Option<String>,
    pub unmapped_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub workspace_id: Option<WorkspaceId>,
    pub name: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub is_global_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A named bundle of permission keys (e.g. `workspace.runs.submit`). Roles
/// are assigned to a user either globally or scoped to one workspace; see
/// `RoleAssignment`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: uuid::Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

/// Binds a user to a role, optionally scoped to one workspace. A `NULL`
/// `workspace_id` is a global assignment (e.g. global admin); a non-null one
/// grants the role's permissions only within that workspace.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role_id: uuid::Uuid,
    pub workspace_id: Option<WorkspaceId>,
}

/// Operator-tunable key/value settings (e.g. default `max_attempts`,
/// `lease_seconds`) exposed read/write through the admin API. Supplemented
/// from `original_source`'s `features/system_settings`; not part of the
/// worker's own contract.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemSetting {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}
