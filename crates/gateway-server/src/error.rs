//! The façade's error type: a thin wrapper mapping domain errors onto the
//! two wire-level error codes (§6) without ever matching on error text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_sql::{BuilderError, ValidationError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    /// Bad caller input: a missing required field, or a rejected query.
    #[error("{0}")]
    InvalidArgument(String),

    /// Anything else unexpected.
    #[error("{0}")]
    Internal(String),
}

impl FacadeError {
    pub fn status(&self) -> StatusCode {
        match self {
            FacadeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            FacadeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for FacadeError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                FacadeError::Internal("internal error".to_string())
            }
            other => FacadeError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<BuilderError> for FacadeError {
    fn from(err: BuilderError) -> Self {
        match err {
            BuilderError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                FacadeError::Internal("internal error".to_string())
            }
            other => FacadeError::InvalidArgument(other.to_string()),
        }
    }
}

impl IntoResponse for FacadeError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_internal_variant_maps_to_generic_internal_error() {
        let err: FacadeError = ValidationError::Internal(anyhow::anyhow!("leaky detail")).into();
        assert!(matches!(err, FacadeError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn validation_error_other_variants_map_to_invalid_argument() {
        let err: FacadeError = ValidationError::NotSelect.into();
        assert!(matches!(err, FacadeError::InvalidArgument(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn builder_error_internal_variant_maps_to_generic_internal_error() {
        let err: FacadeError = BuilderError::Internal(anyhow::anyhow!("leaky detail")).into();
        assert!(matches!(err, FacadeError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn builder_error_other_variants_map_to_invalid_argument() {
        let err: FacadeError = BuilderError::EmptyIntent.into();
        assert!(matches!(err, FacadeError::InvalidArgument(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
