// src/routes/mod.rs

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::engine::EngineError;

pub mod assignments;
pub mod attachments;
pub mod devices;
pub mod health;
pub mod issues;
pub mod reports;
pub mod visits;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Domain errors carry their HTTP status; store/storage faults map to
/// gateway-style failures without leaking backend details.
pub fn engine_error(e: EngineError) -> ApiError {
    let (status, kind) = match &e {
        EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        EngineError::InvalidState(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_state"),
        EngineError::Permission(_) => (StatusCode::FORBIDDEN, "permission_denied"),
        EngineError::NoFilesMoved => (StatusCode::UNPROCESSABLE_ENTITY, "no_files_moved"),
        EngineError::ExternalDependency(_) => (StatusCode::BAD_GATEWAY, "external_dependency"),
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    let message = match &e {
        EngineError::Store(inner) => {
            tracing::error!(error = %inner, "store failure");
            "internal error".to_string()
        }
        other => other.to_string(),
    };
    (status, Json(ErrorBody { error: kind, message }))
}

pub fn internal_error<E: std::fmt::Display>(e: E) -> ApiError {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "internal",
            message: "internal error".to_string(),
        }),
    )
}
