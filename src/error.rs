//! HTTP-facing error type. Every variant renders as
//! `{"success": false, "error": "..."}` with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::DbError;

pub type AppResult<T> = Result<T, AppError>;

pub const BUSY_MESSAGE: &str = "Database connection busy. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service busy")]
    ServiceBusy,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceBusy | AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &str {
        match self {
            AppError::Validation(m)
            | AppError::Unauthorized(m)
            | AppError::Forbidden(m)
            | AppError::NotFound(m)
            | AppError::Conflict(m)
            | AppError::Unavailable(m)
            | AppError::Upstream(m) => m,
            AppError::ServiceBusy => BUSY_MESSAGE,
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!(detail = %redact(detail), "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy { .. } => AppError::ServiceBusy,
            DbError::Sql(sqlx::Error::RowNotFound) => AppError::NotFound("Not found".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

/// Strips line breaks and truncates to 200 characters so error details can
/// be logged without leaking multi-line payloads.
pub fn redact(detail: &str) -> String {
    const MAX: usize = 200;
    let flat: String = detail
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= MAX {
        flat
    } else {
        let mut cut: String = flat.chars().take(MAX).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_503() {
        let err: AppError = DbError::Busy {
            attempts: 5,
            source: sqlx::Error::PoolTimedOut,
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.public_message(), BUSY_MESSAGE);
    }

    #[test]
    fn internal_hides_detail() {
        let err = AppError::Internal("password=hunter2".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn redact_flattens_and_truncates() {
        assert_eq!(redact("a\nb\r\nc"), "a b  c");
        let long = "x".repeat(500);
        let out = redact(&long);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
    }
}
