use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// No usable participant identity on the request.
    #[error("unauthorized")]
    Unauthorized,

    #[error("not authorized: {0}")]
    Authorization(String),

    /// Stale optimistic write rejected by the store.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal server error")]
    Internal,
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::VersionConflict { .. } | StoreError::DuplicateSequence { .. } => {
                AppError::Conflict(e.to_string())
            }
            StoreError::Backend(msg) => AppError::Storage(msg),
        }
    }
}

impl AppError {
    /// Short machine-readable kind used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start_server",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Unauthorized => "unauthorized",
            AppError::Authorization(_) => "authorization",
            AppError::Conflict(_) => "conflict",
            AppError::Storage(_) => "storage",
            AppError::Internal => "internal",
        }
    }

    /// Returns whether the caller may retry the same request unchanged.
    ///
    /// The hub itself never retries; this is advice for transport adapters.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_) | AppError::Storage(_) | AppError::Internal
        )
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Authorization(_) => 403,
            AppError::Conflict(_) => 409,
            AppError::Storage(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => 500,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound("session".into()).status_code(), 404);
        assert_eq!(AppError::Validation("paused".into()).status_code(), 400);
        assert_eq!(AppError::Authorization("author".into()).status_code(), 403);
        assert_eq!(AppError::Conflict("version".into()).status_code(), 409);
        assert_eq!(AppError::Internal.status_code(), 500);
    }

    #[test]
    fn test_store_error_conversion() {
        let id = Uuid::new_v4();
        let err: AppError = StoreError::VersionConflict {
            id,
            expected: 2,
            actual: 3,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(err.is_retryable());

        let err: AppError = StoreError::NotFound(format!("interaction {id}")).into();
        assert_eq!(err, AppError::NotFound(format!("interaction {id}")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_response_body() {
        let resp = AppError::Authorization("only the author may delete".into()).error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
