//! Top-level error type for the HTTP boundary (§7 "Error Handling Design").
//!
//! Every component keeps its own leaf error enum; this type exists only to
//! give the server one place to map any of them onto an HTTP status and a
//! structured `{error, details}` JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Aggregates every error a request handler can propagate.
#[derive(Error, Debug)]
pub enum AppError {
    /// Probe Registry failure (§4.1).
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    /// Sample Intake failure (§4.2).
    #[error(transparent)]
    Intake(#[from] crate::intake::IntakeError),
    /// Batch Writer failure (§4.3).
    #[error(transparent)]
    Writer(#[from] crate::columnar::writer::WriterError),
    /// Read-path query failure (§4.3).
    #[error(transparent)]
    Query(#[from] crate::columnar::QueryError),
    /// Snapshot read/write failure (§4.4).
    #[error(transparent)]
    Snapshot(#[from] crate::columnar::SnapshotError),
    /// Analysis Engine failure (§4.4).
    #[error(transparent)]
    Analysis(#[from] crate::analysis::per_probe::AnalysisError),
    /// Alert Pipeline failure (§4.5).
    #[error(transparent)]
    Alert(#[from] crate::alert::AlertError),
    /// Columnar HTTP transport failure (§4.3).
    #[error(transparent)]
    Columnar(#[from] crate::columnar::ClickHouseError),
    /// A request body or query string failed to decode.
    #[error("invalid request: {0}")]
    BadRequest(String),
    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Registry(crate::registry::RegistryError::InvalidInput(_) | crate::registry::RegistryError::NoTargets) => {
                StatusCode::BAD_REQUEST
            }
            Self::Registry(crate::registry::RegistryError::DuplicateProbe { .. }) => StatusCode::CONFLICT,
            Self::Registry(crate::registry::RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Intake(crate::intake::IntakeError::NoHandler(_) | crate::intake::IntakeError::InvalidPayload { .. } | crate::intake::IntakeError::Decode(_)) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "request failed");
        let status = self.status();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("error").to_string(),
            details: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
