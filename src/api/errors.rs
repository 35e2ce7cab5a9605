use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::ai_grading::OracleError;
use crate::services::assessment::EvaluationError;

const GENERIC_FAILURE: &str = "Internal Server Error";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    ServiceUnavailable(String),
    GatewayTimeout(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(GENERIC_FAILURE.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EvaluationError> for ApiError {
    fn from(err: EvaluationError) -> Self {
        match &err {
            EvaluationError::Extraction(source) if source.is_unconfigured() => {
                tracing::error!(error = %err, "Text extraction is not configured");
                Self::ServiceUnavailable("Document text extraction is not configured".to_string())
            }
            EvaluationError::Oracle { source: OracleError::NotConfigured, .. } => {
                tracing::error!(error = %err, "Scoring model is not configured");
                Self::ServiceUnavailable("Scoring model is not configured".to_string())
            }
            EvaluationError::DeadlineExceeded(_) => {
                tracing::error!(error = %err, "Evaluation deadline exceeded");
                Self::GatewayTimeout("Evaluation did not finish in time".to_string())
            }
            _ => Self::internal(&err, "Evaluation failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            Self::BadRequest(message)
            | Self::ServiceUnavailable(message)
            | Self::GatewayTimeout(message)
            | Self::Internal(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}
