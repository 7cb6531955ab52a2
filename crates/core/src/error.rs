use thiserror::Error;

/// Rejections raised when validating a relay payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("{field} must be greater than zero when set")]
    ZeroLimit { field: &'static str },
}
