use axum::http::HeaderMap;
use sqlx::{error::DatabaseError, Error as SqlxError};
use tracing::error;

/// Domain failure classes raised by persistence and services.
///
/// Carried inside `anyhow::Error` and recovered by downcast, both by callers
/// that need to tell "not found" apart from storage failures and by the HTTP
/// boundary when choosing a status code.
#[derive(Debug)]
pub enum DomainError {
    /// Invalid or non-positive identifiers, missing fields, unparsable input.
    InvalidArgument(String),
    /// Referenced entity is disabled or absent.
    NotFound(&'static str),
    /// Caller does not own the entity.
    PermissionDenied(String),
    /// A stored blob failed to decode.
    MalformedData {
        field: &'static str,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            DomainError::NotFound(what) => write!(f, "{what} not found"),
            DomainError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            DomainError::MalformedData { field, source } => {
                write!(f, "malformed stored {field}: {source}")
            }
        }
    }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DomainError::MalformedData { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub fn invalid_argument(msg: impl Into<String>) -> anyhow::Error {
    DomainError::InvalidArgument(msg.into()).into()
}

pub fn not_found(what: &'static str) -> anyhow::Error {
    DomainError::NotFound(what).into()
}

pub fn permission_denied(msg: impl Into<String>) -> anyhow::Error {
    DomainError::PermissionDenied(msg.into()).into()
}

pub fn malformed(field: &'static str, source: serde_json::Error) -> anyhow::Error {
    DomainError::MalformedData { field, source }.into()
}

/// Whether the error chain carries the not-found sentinel.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.chain()
            .find_map(|cause| cause.downcast_ref::<DomainError>()),
        Some(DomainError::NotFound(_))
    )
}

/// Reject identifiers that cannot refer to a stored row.
pub fn require_id(id: i64, what: &'static str) -> crate::Result<()> {
    if id <= 0 {
        return Err(invalid_argument(format!("invalid {what} id: {id}")));
    }
    Ok(())
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: axum::http::StatusCode,
    pub code: &'static str,
    pub message: String,
    pub headers: Option<Box<HeaderMap>>,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

const DB_UNAVAILABLE_MESSAGE: &str = "database temporarily unavailable";

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::FORBIDDEN,
            code: "forbidden",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            code: "not_found",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            code: "service_unavailable",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: msg.to_string(),
            headers: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    SerializationFailure,
    Deadlock,
    Busy,
}

fn map_anyhow_error(err: &anyhow::Error) -> Option<AppError> {
    if let Some(domain) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<DomainError>())
    {
        return Some(map_domain_error(domain));
    }
    let sqlx_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())?;
    map_sqlx_error(sqlx_err)
}

fn map_domain_error(err: &DomainError) -> AppError {
    match err {
        DomainError::InvalidArgument(msg) => AppError::bad_request(msg.clone()),
        DomainError::NotFound(what) => AppError::not_found(format!("{what} not found")),
        DomainError::PermissionDenied(msg) => AppError::forbidden(msg.clone()),
        DomainError::MalformedData { .. } => AppError::internal("stored configuration is corrupt"),
    }
}

fn map_sqlx_error(err: &SqlxError) -> Option<AppError> {
    match err {
        SqlxError::RowNotFound => Some(AppError::not_found("resource not found")),
        SqlxError::Database(db_err) => map_database_error(db_err.as_ref()),
        SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        SqlxError::Io(_) | SqlxError::Tls(_) => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        _ => None,
    }
}

fn map_database_error(err: &dyn DatabaseError) -> Option<AppError> {
    let kind = classify_db_error(err.code().as_deref(), err.message())?;
    match kind {
        DbErrorKind::UniqueViolation => Some(AppError::bad_request("resource already exists")),
        DbErrorKind::ForeignKeyViolation => Some(AppError::bad_request("invalid reference")),
        DbErrorKind::NotNullViolation => Some(AppError::bad_request("missing required field")),
        DbErrorKind::CheckViolation => Some(AppError::bad_request("invalid request")),
        DbErrorKind::SerializationFailure | DbErrorKind::Deadlock | DbErrorKind::Busy => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
    }
}

fn classify_db_error(code: Option<&str>, message: &str) -> Option<DbErrorKind> {
    let code = code.unwrap_or_default();
    let message = message.to_ascii_lowercase();

    if matches!(code, "23505" | "2067" | "1555")
        || message.contains("unique constraint")
        || message.contains("duplicate key")
    {
        return Some(DbErrorKind::UniqueViolation);
    }

    if matches!(code, "23503" | "787") || message.contains("foreign key constraint") {
        return Some(DbErrorKind::ForeignKeyViolation);
    }

    if code == "23502" || message.contains("not null constraint") {
        return Some(DbErrorKind::NotNullViolation);
    }

    if code == "23514" || message.contains("check constraint") {
        return Some(DbErrorKind::CheckViolation);
    }

    if code == "40001" || message.contains("serialization failure") {
        return Some(DbErrorKind::SerializationFailure);
    }

    if code == "40P01" || message.contains("deadlock") {
        return Some(DbErrorKind::Deadlock);
    }

    if message.contains("database is locked") || message.contains("database is busy") {
        return Some(DbErrorKind::Busy);
    }

    None
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(mapped) = map_anyhow_error(&err) {
            if mapped.status.is_server_error() {
                crate::telemetry::record_internal_error_metrics(&err);
                error!(?err, "internal error");
            }
            return mapped;
        }

        crate::telemetry::record_internal_error_metrics(&err);
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}
