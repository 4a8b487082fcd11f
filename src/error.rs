//! Error types for NeoBase.
//!
//! `NeoBaseError` is the single error enum used throughout the backend. Each
//! variant maps to one of the surface labels in the error taxonomy (§7):
//! `validation`, `auth`, `notFound`, `conflict`, `upstream`,
//! `driver.connect|execute|timeout|cancelled`, `ingest.convert`, `fatal`.
//! Handlers convert it to the `{success, error, statusCode}` envelope via
//! `IntoResponse`; the stream hub uses `code()` for the `error` event's
//! machine-readable field.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Main error type for NeoBase operations.
#[derive(Error, Debug)]
pub enum NeoBaseError {
    /// Malformed input, unknown database type, malformed IDs.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing/invalid token, wrong credentials, expired OTP.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Missing chat, message, query, table.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate username/email, already on waitlist.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// LLM RPC or external API failure.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Driver could not establish a connection.
    #[error("Driver connect error: {0}")]
    DriverConnect(String),

    /// Driver failed to execute a query.
    #[error("Driver execute error: {0}")]
    DriverExecute(String),

    /// Driver operation exceeded its deadline.
    #[error("Driver timeout: {0}")]
    DriverTimeout(String),

    /// Driver operation was cancelled via the Cancellation Registry.
    #[error("Driver cancelled: {0}")]
    DriverCancelled(String),

    /// Spreadsheet cell-to-type conversion failure (non-fatal, recorded as a warning).
    #[error("Ingestion conversion error: {0}")]
    IngestConvert(String),

    /// Crypto key unavailable, store unreachable, or other startup-fatal condition.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Internal application error not covered by the taxonomy above.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NeoBaseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn driver_connect(msg: impl Into<String>) -> Self {
        Self::DriverConnect(msg.into())
    }

    pub fn driver_execute(msg: impl Into<String>) -> Self {
        Self::DriverExecute(msg.into())
    }

    pub fn driver_timeout(msg: impl Into<String>) -> Self {
        Self::DriverTimeout(msg.into())
    }

    pub fn driver_cancelled(msg: impl Into<String>) -> Self {
        Self::DriverCancelled(msg.into())
    }

    pub fn ingest_convert(msg: impl Into<String>) -> Self {
        Self::IngestConvert(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code, used both in HTTP error bodies and in
    /// the stream hub's `error` event payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "notFound",
            Self::Conflict(_) => "conflict",
            Self::Upstream(_) => "upstream",
            Self::DriverConnect(_) => "driver.connect",
            Self::DriverExecute(_) => "driver.execute",
            Self::DriverTimeout(_) => "driver.timeout",
            Self::DriverCancelled(_) => "driver.cancelled",
            Self::IngestConvert(_) => "ingest.convert",
            Self::Fatal(_) => "fatal",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status this error surfaces as, per §7.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::DriverConnect(_) | Self::DriverExecute(_) | Self::DriverTimeout(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::DriverCancelled(_) => StatusCode::BAD_REQUEST,
            Self::IngestConvert(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Fatal(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire format for error responses: `{success, error, statusCode, code}`.
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
    code: &'static str,
}

impl IntoResponse for NeoBaseError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            status_code: status.as_u16(),
            code: self.code(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for NeoBaseError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::not_found("row not found"),
            other => Self::driver_execute(other.to_string()),
        }
    }
}

/// Result type alias using NeoBaseError.
pub type Result<T> = std::result::Result<T, NeoBaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(NeoBaseError::validation("x").code(), "validation");
        assert_eq!(NeoBaseError::auth("x").code(), "auth");
        assert_eq!(NeoBaseError::not_found("x").code(), "notFound");
        assert_eq!(NeoBaseError::conflict("x").code(), "conflict");
        assert_eq!(NeoBaseError::upstream("x").code(), "upstream");
        assert_eq!(NeoBaseError::driver_connect("x").code(), "driver.connect");
        assert_eq!(NeoBaseError::driver_execute("x").code(), "driver.execute");
        assert_eq!(NeoBaseError::driver_timeout("x").code(), "driver.timeout");
        assert_eq!(
            NeoBaseError::driver_cancelled("x").code(),
            "driver.cancelled"
        );
        assert_eq!(NeoBaseError::ingest_convert("x").code(), "ingest.convert");
        assert_eq!(NeoBaseError::fatal("x").code(), "fatal");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            NeoBaseError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(NeoBaseError::auth("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            NeoBaseError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            NeoBaseError::conflict("x").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            NeoBaseError::upstream("x").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NeoBaseError>();
    }
}
