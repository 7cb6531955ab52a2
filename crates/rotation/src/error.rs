use mailrotor_core::ValidationError;
use mailrotor_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`SmtpRotation`](crate::SmtpRotation).
#[derive(Debug, Error)]
pub enum RotationError {
    /// No relay with the given id exists.
    #[error("smtp config not found: {0}")]
    NotFound(Uuid),

    /// The payload failed validation.
    #[error("invalid smtp config: {0}")]
    Validation(String),

    /// Every active relay has spent its quota, or none is active.
    #[error("no smtp relay available")]
    NoRelayAvailable,

    /// The relay store failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RotationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for RotationError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}
