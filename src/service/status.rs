//! Hub errors and their HTTP status mapping.

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::sync::Arc;

use crate::backend::{BackendError, Code};

/// Optional hook consulted before the fixed backend error table.
///
/// Returning `None` declines and lets the table decide.
#[derive(Clone)]
pub struct ErrorMapper(Arc<dyn Fn(&BackendError) -> Option<StatusCode> + Send + Sync>);

impl ErrorMapper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&BackendError) -> Option<StatusCode> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn map(&self, err: &BackendError) -> Option<StatusCode> {
        (self.0)(err)
    }
}

impl fmt::Debug for ErrorMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorMapper")
    }
}

/// Fixed mapping from backend failure category to HTTP status.
#[must_use]
pub const fn status_for_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled | Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        Code::InvalidArgument | Code::OutOfRange | Code::AlreadyExists => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::PermissionDenied | Code::ResourceExhausted => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Aborted => StatusCode::CONFLICT,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Maps a backend failure to an HTTP status: override hook first, then the
/// fixed table, then 500 for errors without a failure category.
#[must_use]
pub fn to_http_status(mapper: Option<&ErrorMapper>, err: &BackendError) -> StatusCode {
    mapper
        .and_then(|m| m.map(err))
        .or_else(|| err.code().map(status_for_code))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Errors returned by hub handlers
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Malformed or missing request data, or a bad signature
    #[error("{0}")]
    BadRequest(String),
    /// Unknown source log, or a proof or leaf that is not obtainable yet
    #[error("{0}")]
    NotFound(String),
    /// A backend call failed; `status` comes from the error mapper
    #[error("backend {op} request failed: {source}")]
    Backend {
        op: &'static str,
        status: StatusCode,
        #[source]
        source: BackendError,
    },
    /// The backend broke its own contract
    #[error("{0}")]
    Integrity(String),
    /// Any other server-side failure
    #[error("{0}")]
    Internal(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(Method),
}

impl HubError {
    /// Map to an HTTP status code.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Backend { status, .. } => *status,
            Self::Integrity(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

/// Plain text error body: status text, newline, error detail.
impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!(
            "{}\n{}\n",
            status.canonical_reason().unwrap_or("Unknown Status"),
            self
        );
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
