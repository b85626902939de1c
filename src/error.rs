use thiserror::Error;

/// Domain failures surfaced over IPC. Validation errors are raised before any
/// write happens; a `Db` error mid-transaction rolls the transaction back.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Malformed request (missing/ill-typed params).
    #[error("{0}")]
    BadParams(String),

    /// Well-formed but logically inconsistent request.
    #[error("{0}")]
    InvalidArgument(String),

    // Uniform message: never reveal which of user/password/active was wrong.
    #[error("invalid username or password")]
    AuthFailed,

    /// Missing, invalid, or expired session token.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("{0}")]
    ExternalService(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::BadParams(_) => "bad_params",
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::AuthFailed => "auth_failed",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Internal(_) => "internal",
            ServiceError::NoWorkspace => "no_workspace",
            ServiceError::ExternalService(_) => "external_service",
            ServiceError::Db(_) => "db_query_failed",
        }
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        ServiceError::NotFound(format!("{} not found with id: {}", what, id))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
