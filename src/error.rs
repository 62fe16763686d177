//! Centralized error handling for the IPTV gateway
//!
//! Every variant maps onto one of the error kinds the ingestion/resolution
//! pipeline is specified against: configuration, transient/permanent upstream
//! failures, storage unavailability, scheduler gating, and not-found. Each
//! variant also carries an HTTP status mapping for the thin edge that
//! re-exports the resolver/inventory over HTTP.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing/invalid configuration (unset TMDB key, missing provider secrets).
    /// Surfaced immediately at the originating operation; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network timeout, 5xx, DNS failure, connection refused. Recoverable by
    /// retrying, or by skipping the single unit of work that hit it.
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    /// 4xx, malformed body, or missing required payload fields from an
    /// upstream provider or TMDB. Not retried.
    #[error("upstream permanent error: {0}")]
    UpstreamPermanent(String),

    /// The persistent store is unavailable. Reads should fall back to a
    /// caller-supplied safe default; writes propagate so batches can retry.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A scheduler job was asked to start while already running.
    #[error("job already running: {0}")]
    AlreadyRunning(String),

    /// A scheduler job was blocked by `skipIfOtherInProgress`.
    #[error("job blocked by in-progress jobs: {0:?}")]
    Blocked(Vec<String>),

    /// Resource-specific not-found, surfaced as a 404 at the edge.
    #[error("not found: {0}")]
    NotFound(String),

    /// No reachable candidate exists for the requested resource right now
    /// (distinct from `NotFound`: the resource is known, nothing serves it).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        AppError::Configuration(message.into())
    }

    pub fn upstream_transient<T: Into<String>>(message: T) -> Self {
        AppError::UpstreamTransient(message.into())
    }

    pub fn upstream_permanent<T: Into<String>>(message: T) -> Self {
        AppError::UpstreamPermanent(message.into())
    }

    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        AppError::NotFound(resource.into())
    }

    pub fn service_unavailable<T: Into<String>>(message: T) -> Self {
        AppError::ServiceUnavailable(message.into())
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        AppError::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamPermanent(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AlreadyRunning(_) | AppError::Blocked(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            AppError::UpstreamPermanent(_) => "UPSTREAM_PERMANENT",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::AlreadyRunning(_) => "JOB_ALREADY_RUNNING",
            AppError::Blocked(_) => "JOB_CANNOT_RUN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::HttpClient(_) => "HTTP_CLIENT_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Url(_) => "URL_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub blocking_jobs: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.error_code();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR => tracing::error!("{}", self),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!("{}", self)
            }
            _ => tracing::debug!("{}", self),
        }

        let blocking_jobs = match &self {
            AppError::Blocked(jobs) => Some(jobs.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
            code: code.to_string(),
            blocking_jobs,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            AppError::configuration("missing key").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Blocked(vec!["sync".into()]).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::not_found("title").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::service_unavailable("no live source").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AppError::AlreadyRunning("sync".into()).error_code(), "JOB_ALREADY_RUNNING");
        assert_eq!(
            AppError::Blocked(vec!["a".into()]).error_code(),
            "JOB_CANNOT_RUN"
        );
    }
}
