use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::fanout::FanoutError, application::pagination::PaginationError,
    application::repos::RepoError, application::timeline::TimelineError,
    domain::error::DomainError, infra::error::InfraError,
};

/// Error chain attached to responses so middleware can log the full cause.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("missing or malformed identity header")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<TimelineError> for AppError {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::Repo(err) => AppError::Repo(err),
            TimelineError::Fanout(err) => AppError::Fanout(err),
            forbidden @ TimelineError::Forbidden(_) => AppError::Forbidden(forbidden.to_string()),
        }
    }
}

impl From<PaginationError> for AppError {
    fn from(err: PaginationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Repo(RepoError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Validation(_)
            | AppError::Repo(RepoError::InvalidPageToken(_))
            | AppError::Repo(RepoError::SelfSubscription) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Repo(RepoError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Repo(RepoError::Unavailable(_))
            | AppError::Infra(InfraError::Database { .. })
            | AppError::Infra(InfraError::CacheBackend { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Repo(RepoError::CreationFailed(_))
            | AppError::Repo(RepoError::Write(_))
            | AppError::Fanout(_)
            | AppError::Infra(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Repo(RepoError::NotFound) => "Resource not found",
            AppError::Repo(RepoError::InvalidPageToken(_)) => "Invalid page token",
            AppError::Repo(RepoError::SelfSubscription) => "Users cannot subscribe to themselves",
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => {
                "Request could not be processed"
            }
            AppError::Unauthorized => "Missing or invalid user id",
            AppError::Forbidden(_) => "Operation not permitted",
            AppError::Repo(RepoError::Timeout) => "Storage did not respond in time",
            AppError::Repo(RepoError::Unavailable(_))
            | AppError::Infra(InfraError::Database { .. })
            | AppError::Infra(InfraError::CacheBackend { .. }) => "Service temporarily unavailable",
            AppError::Repo(RepoError::CreationFailed(_)) => "Post could not be created",
            AppError::Repo(RepoError::Write(_)) => "Write could not be completed",
            AppError::Fanout(_) => "Follow-up work could not be scheduled",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_to_statuses() {
        assert_eq!(
            AppError::from(RepoError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(RepoError::InvalidPageToken("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RepoError::SelfSubscription).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RepoError::Timeout).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(RepoError::Unavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(RepoError::CreationFailed("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn forbidden_timeline_error_maps_to_403() {
        let post = crate::domain::types::PostId::parse("abc").expect("post id");
        let err = AppError::from(TimelineError::Forbidden(post));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }
}
