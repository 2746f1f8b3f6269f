//! Error taxonomy for the `envmon-stats` service.
//!
//! Every operation exposed by the access façade returns [`Result`], so callers
//! (HTTP routes, tests, a future CLI) see the same five failure classes:
//! malformed input, missing entities, role failures, storage trouble and
//! conflicting writes. The HTTP mapping lives here too, keeping `routes/*`
//! free of status-code decisions.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core and the access façade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ---
    /// Malformed input, rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced reading, station, template or report does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's role does not allow the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Connection loss or an unexpected database failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A write collided with existing state (unique key, derived flag).
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    // ---
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// True for failures worth one retry with a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // ---
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::NotFound(format!(
                "referenced entity does not exist ({})",
                db.constraint().unwrap_or("foreign key")
            )),
            _ => Error::Storage(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Storage(format!("migration failed: {err}"))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // ---
        let (status, error_code) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        };
        let message = match &self {
            Error::Validation(m)
            | Error::NotFound(m)
            | Error::Forbidden(m)
            | Error::Storage(m)
            | Error::Conflict(m) => m.clone(),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "Request error");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
