//! Call-level errors.
//!
//! These are returned synchronously from a service operation and mean the
//! request itself was unusable. Problems met while installing providers are
//! never reported this way; they travel as diagnostics in the event stream.

use lockstep_core::InvalidHandle;
use lockstep_core::resolver::ResolveError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    InvalidHandle(#[from] InvalidHandle),

    #[error("{0}")]
    Resolution(String),

    /// A request shape this build doesn't know how to handle.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Unknown(String),
}

impl ServiceError {
    pub fn invalid_argument(msg: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// Stable status name, for callers that map errors onto a transport.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::InvalidHandle(_) => "invalid_argument",
            Self::Resolution(_) => "failed_precondition",
            Self::Internal(_) => "internal",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Only `Internal` marks a bug rather than bad input.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<ResolveError> for ServiceError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoVersionSatisfiesConstraints { .. } => Self::Resolution(err.to_string()),
            ResolveError::InvalidAddress(_)
            | ResolveError::InvalidConstraints(_)
            | ResolveError::ConstraintsNotSupported => Self::InvalidArgument(err.to_string()),
        }
    }
}
