use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryError;
use crate::notifications::transport::TransportError;
use crate::reports::render::RenderError;
use crate::uploads::PhotoStoreError;

/// JSON body of an error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Canonical reason of the status, e.g. "Conflict"
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Dependency error: {0}")]
    DependencyError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<DirectoryError> for ServiceError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            other => ServiceError::DependencyError(other.to_string()),
        }
    }
}

impl From<PhotoStoreError> for ServiceError {
    fn from(err: PhotoStoreError) -> Self {
        ServiceError::DependencyError(err.to_string())
    }
}

impl From<TransportError> for ServiceError {
    fn from(err: TransportError) -> Self {
        ServiceError::DependencyError(err.to_string())
    }
}

impl From<RenderError> for ServiceError {
    fn from(err: RenderError) -> Self {
        ServiceError::DependencyError(err.to_string())
    }
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    /// HTTP status for this error kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DependencyError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to callers; storage and internal failures stay generic.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn conflict_renders_as_409_with_message() {
        let response =
            ServiceError::Conflict("an active opname session already exists".into())
                .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.error, "Conflict");
        assert!(payload.message.contains("active opname session"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidStatus("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::DependencyError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::db_error(DbErr::Custom("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::db_error(DbErr::Custom("relation does not exist".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("stack".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("opname session 7".into()).response_message(),
            "Not found: opname session 7"
        );
    }

    #[test]
    fn collaborator_errors_become_dependency_errors() {
        let err: ServiceError = PhotoStoreError::Io {
            url: "/uploads/asset_condition_photo/a.jpg".into(),
            message: "permission denied".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::DependencyError(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
