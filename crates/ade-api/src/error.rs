use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use ade_core::ProblemType;

/// HTTP-facing wrapper around [`ade_core::Error`]: renders Problem Details
/// (RFC 9457, `application/problem+json`) per spec.md §7's field list.
/// Route-local failures that have no `ade_core::Error` shape (CSRF, missing
/// auth header) go through their own variants so the `type` slug stays
/// stable even though nothing in `ade-core` models HTTP concerns.
#[derive(Debug)]
pub struct ApiError {
    problem_type: ProblemType,
    detail: String,
    instance: Option<String>,
}

impl ApiError {
    pub fn new(problem_type: ProblemType, detail: impl Into<String>) -> Self {
        Self {
            problem_type,
            detail: detail.into(),
            instance: None,
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Unauthorized, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Forbidden, detail)
    }

    pub fn csrf_rejected() -> Self {
        Self::new(ProblemType::CsrfRejected, "CSRF token missing or mismatched")
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    fn status(&self) -> StatusCode {
        match self.problem_type {
            ProblemType::NotFound => StatusCode::NOT_FOUND,
            ProblemType::PreconditionRequired => StatusCode::PRECONDITION_REQUIRED,
            ProblemType::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ProblemType::ConfigurationNotEditable
            | ProblemType::ActiveConfigurationConflict
            | ProblemType::PublishConflict
            | ProblemType::Conflict => StatusCode::CONFLICT,
            ProblemType::InvalidSourceShape
            | ProblemType::EngineDependencyMissing
            | ProblemType::InvalidArchive => StatusCode::UNPROCESSABLE_ENTITY,
            ProblemType::ArchiveTooLarge | ProblemType::FileTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ProblemType::TooManyEntries => StatusCode::UNPROCESSABLE_ENTITY,
            ProblemType::UnsafePath | ProblemType::PathNotAllowed => StatusCode::BAD_REQUEST,
            ProblemType::Unauthorized => StatusCode::UNAUTHORIZED,
            ProblemType::Forbidden | ProblemType::CsrfRejected => StatusCode::FORBIDDEN,
            ProblemType::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self.problem_type {
            ProblemType::UnsafePath => "Unsafe path",
            ProblemType::NotFound => "Not found",
            ProblemType::PreconditionRequired => "Precondition required",
            ProblemType::PreconditionFailed => "Precondition failed",
            ProblemType::ConfigurationNotEditable => "Configuration is not editable",
            ProblemType::ActiveConfigurationConflict => "Active configuration conflict",
            ProblemType::PublishConflict => "Publish conflict",
            ProblemType::InvalidSourceShape => "Invalid source shape",
            ProblemType::EngineDependencyMissing => "Engine dependency missing",
            ProblemType::ArchiveTooLarge => "Archive too large",
            ProblemType::TooManyEntries => "Too many entries",
            ProblemType::FileTooLarge => "File too large",
            ProblemType::InvalidArchive => "Invalid archive",
            ProblemType::PathNotAllowed => "Path not allowed",
            ProblemType::Unauthorized => "Unauthorized",
            ProblemType::Forbidden => "Forbidden",
            ProblemType::CsrfRejected => "CSRF token rejected",
            ProblemType::Conflict => "Conflict",
            ProblemType::Internal => "Internal error",
        }
    }
}

impl From<ade_core::Error> for ApiError {
    fn from(err: ade_core::Error) -> Self {
        let problem_type = err.problem_type();
        if matches!(problem_type, ProblemType::Internal) {
            tracing::error!(error = %err, "internal error");
        }
        Self::new(problem_type, err.to_string())
    }
}

#[derive(Serialize)]
struct ProblemBody {
    #[serde(rename = "type")]
    problem_type: String,
    title: &'static str,
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ProblemBody {
            problem_type: format!("https://ade.dev/problems/{}", self.problem_type.slug()),
            title: self.title(),
            status: status.as_u16(),
            detail: self.detail,
            instance: self.instance,
            request_id: None,
            errors: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::new(ProblemType::NotFound, "no such thing");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.title(), "Not found");
    }

    #[test]
    fn precondition_required_maps_to_428() {
        let err = ApiError::new(ProblemType::PreconditionRequired, "If-Match required");
        assert_eq!(err.status(), StatusCode::PRECONDITION_REQUIRED);
    }

    #[test]
    fn publish_conflict_maps_to_409() {
        let err = ApiError::new(ProblemType::PublishConflict, "already published");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.title(), "Publish conflict");
    }

    #[test]
    fn csrf_rejected_maps_to_403_with_fixed_detail() {
        let err = ApiError::csrf_rejected();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.detail, "CSRF token missing or mismatched");
    }

    #[test]
    fn internal_maps_to_500() {
        let err = ApiError::new(ProblemType::Internal, "boom");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.title(), "Internal error");
    }

    #[tokio::test]
    async fn into_response_serializes_problem_details_shape() {
        let err = ApiError::new(ProblemType::NotFound, "configuration not found")
            .with_instance("/workspaces/1/configurations/2");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["title"], "Not found");
        assert_eq!(body["status"], 404);
        assert_eq!(body["detail"], "configuration not found");
        assert_eq!(body["instance"], "/workspaces/1/configurations/2");
        assert_eq!(body["type"], "https://ade.dev/problems/not-found");
    }
}
