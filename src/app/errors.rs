use crate::auth::AuthError;
use crate::profiles::StoreError;
use crate::semantic::{EmbeddingError, IndexError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("invalid or missing credentials")]
    Unauthorized,

    #[error("this profile belongs to a different account")]
    Forbidden,

    #[error("profile not found")]
    NotFound,

    #[error("embedding engine unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("malformed vector: expected {expected} components, got {got}")]
    MalformedVector { expected: usize, got: usize },

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(msg) => AppError::Duplicate(msg),
            StoreError::NotFound => AppError::NotFound,
            StoreError::AlreadyClaimed => AppError::Forbidden,
            StoreError::MalformedVector(index_err) => index_err.into(),
            StoreError::Io(err) => AppError::IO(err),
            other => AppError::Other(anyhow::anyhow!(other)),
        }
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                AppError::MalformedVector { expected, got }
            }
            IndexError::ZeroNormVector => {
                AppError::Validation("vector has zero norm".to_string())
            }
        }
    }
}

impl From<EmbeddingError> for AppError {
    fn from(err: EmbeddingError) -> Self {
        AppError::EmbeddingUnavailable(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::Unauthorized
    }
}
