use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error tags shared across crates so `ade-api` can render Problem
/// Details without re-deriving a `type` string per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemType {
    UnsafePath,
    NotFound,
    PreconditionRequired,
    PreconditionFailed,
    ConfigurationNotEditable,
    ActiveConfigurationConflict,
    PublishConflict,
    InvalidSourceShape,
    EngineDependencyMissing,
    ArchiveTooLarge,
    TooManyEntries,
    FileTooLarge,
    InvalidArchive,
    PathNotAllowed,
    Unauthorized,
    Forbidden,
    CsrfRejected,
    Conflict,
    Internal,
}

impl ProblemType {
    /// The stable slug used as the Problem Details `type` field suffix.
    pub fn slug(self) -> &'static str {
        match self {
            ProblemType::UnsafePath => "unsafe-path",
            ProblemType::NotFound => "not-found",
            ProblemType::PreconditionRequired => "precondition-required",
            ProblemType::PreconditionFailed => "precondition-failed",
            ProblemType::ConfigurationNotEditable => "configuration-not-editable",
            ProblemType::ActiveConfigurationConflict => "active-configuration-conflict",
            ProblemType::PublishConflict => "publish-conflict",
            ProblemType::InvalidSourceShape => "invalid-source-shape",
            ProblemType::EngineDependencyMissing => "engine-dependency-missing",
            ProblemType::ArchiveTooLarge => "archive-too-large",
            ProblemType::TooManyEntries => "too-many-entries",
            ProblemType::FileTooLarge => "file-too-large",
            ProblemType::InvalidArchive => "invalid-archive",
            ProblemType::PathNotAllowed => "path-not-allowed",
            ProblemType::Unauthorized => "unauthorized",
            ProblemType::Forbidden => "forbidden",
            ProblemType::CsrfRejected => "csrf-rejected",
            ProblemType::Conflict => "conflict",
            ProblemType::Internal => "internal",
        }
    }
}

/// Errors common to every crate in the workspace. Domain crates define their
/// own richer error enums and convert into this one at their public
/// boundary so `ade-api` has one thing to render.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsafe path: {0}")]
    UnsafePath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition required: {0}")]
    PreconditionRequired(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("configuration is not editable: {0}")]
    ConfigurationNotEditable(String),

    #[error("workspace already has an active configuration: {0}")]
    ActiveConfigurationConflict(String),

    #[error("publish conflict: {0}")]
    PublishConflict(String),

    #[error("invalid source shape: {0}")]
    InvalidSourceShape(String),

    #[error("engine dependency missing: {0}")]
    EngineDependencyMissing(String),

    #[error("archive too large: {0}")]
    ArchiveTooLarge(String),

    #[error("archive has too many entries: {0}")]
    TooManyEntries(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("csrf token rejected")]
    CsrfRejected,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn problem_type(&self) -> ProblemType {
        match self {
            Error::UnsafePath(_) => ProblemType::UnsafePath,
            Error::NotFound(_) => ProblemType::NotFound,
            Error::PreconditionRequired(_) => ProblemType::PreconditionRequired,
            Error::PreconditionFailed(_) => ProblemType::PreconditionFailed,
            Error::ConfigurationNotEditable(_) => ProblemType::ConfigurationNotEditable,
            Error::ActiveConfigurationConflict(_) => ProblemType::ActiveConfigurationConflict,
            Error::PublishConflict(_) => ProblemType::PublishConflict,
            Error::InvalidSourceShape(_) => ProblemType::InvalidSourceShape,
            Error::EngineDependencyMissing(_) => ProblemType::EngineDependencyMissing,
            Error::ArchiveTooLarge(_) => ProblemType::ArchiveTooLarge,
            Error::TooManyEntries(_) => ProblemType::TooManyEntries,
            Error::FileTooLarge(_) => ProblemType::FileTooLarge,
            Error::InvalidArchive(_) => ProblemType::InvalidArchive,
            Error::PathNotAllowed(_) => ProblemType::PathNotAllowed,
            Error::Unauthorized => ProblemType::Unauthorized,
            Error::Forbidden(_) => ProblemType::Forbidden,
            Error::CsrfRejected => ProblemType::CsrfRejected,
            Error::Conflict(_) => ProblemType::Conflict,
            Error::Io(_) | Error::Json(_) | Error::Database(_) | Error::Internal(_) => ProblemType::Internal,
        }
    }
}
