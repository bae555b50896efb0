//! Error taxonomy shared by all three workers and the thin invocation
//! surface. Grounded on `examples/beshu-tech-deltaglider_proxy/src/api/
//! errors.rs` (code/status split, `IntoResponse` impl) and `src/storage/
//! traits.rs`'s `StorageError`, adapted to this spec's JSON error contract
//! (§6) rather than S3 XML.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// The five-way error taxonomy from SPEC_FULL.md §7. `Transient` is not a
/// distinct HTTP status — it is the retryable subset of `Upstream`, handled
/// internally by the reindexer's batch retry loop (§4.3) and never
/// surfaced past a worker boundary; it exists so retry call sites can
/// pattern-match instead of guessing from a string.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity error: computed digest does not match asserted shard cid")]
    Integrity,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("transient error: {0}")]
    Transient(String),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WorkerError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        WorkerError::NotFound(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        WorkerError::Upstream(msg.into())
    }

    /// Whether internal retry logic (table batch writes, driver-level
    /// network retries) should treat this as retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkerError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkerError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkerError::Integrity => StatusCode::INTERNAL_SERVER_ERROR,
            WorkerError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WorkerError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            ok: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::objectio::ObjectIoError> for WorkerError {
    fn from(err: crate::objectio::ObjectIoError) -> Self {
        match err {
            crate::objectio::ObjectIoError::NotFound(key) => WorkerError::not_found(key),
            crate::objectio::ObjectIoError::Transient(msg) => WorkerError::Transient(msg),
            other => WorkerError::upstream(other.to_string()),
        }
    }
}

impl From<crate::table::TableError> for WorkerError {
    fn from(err: crate::table::TableError) -> Self {
        match err {
            crate::table::TableError::Transient(msg) => WorkerError::Transient(msg),
            other => WorkerError::upstream(other.to_string()),
        }
    }
}

impl From<crate::car::CarError> for WorkerError {
    fn from(err: crate::car::CarError) -> Self {
        WorkerError::upstream(err.to_string())
    }
}
