// src/engine/error.rs

use crate::store::StoreError;

/// Domain-error taxonomy for the lifecycle engine. Every operation either
/// commits in full or returns one of these with no state change applied.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Permission(String),

    #[error("no files were moved from the upload batch")]
    NoFilesMoved,

    #[error("storage backend failure: {0}")]
    ExternalDependency(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        EngineError::InvalidState(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        EngineError::Permission(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
