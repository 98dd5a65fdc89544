//! Error types for backend round-trips.

use cardflow_core::ErrorDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Backend operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOperation {
    /// Card tokenization.
    Tokenize,

    /// Payment authorization.
    Authorize,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokenize => write!(f, "tokenize"),
            Self::Authorize => write!(f, "authorize"),
        }
    }
}

/// Errors that can occur during a backend round-trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend refused to tokenize the card.
    #[error("Tokenization failed: {message}")]
    Tokenization { message: String },

    /// The backend declined the payment.
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    /// The request did not complete in time.
    #[error("Backend {operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: BackendOperation,
        duration_ms: u64,
    },

    /// The backend answered with an error status.
    #[error("Backend rejected {operation} with status {status}: {message}")]
    Rejected {
        operation: BackendOperation,
        status: u16,
        message: String,
    },

    /// The request itself was malformed.
    #[error("Invalid backend request: {0}")]
    InvalidRequest(String),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a new tokenization error.
    pub fn tokenization(message: impl Into<String>) -> Self {
        Self::Tokenization {
            message: message.into(),
        }
    }

    /// Create a new authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(operation: BackendOperation, duration_ms: u64) -> Self {
        Self::Timeout {
            operation,
            duration_ms,
        }
    }

    /// Create a new rejected request error.
    pub fn rejected(operation: BackendOperation, status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Create a new invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<BackendError> for ErrorDescriptor {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Tokenization { message } => Self::tokenization(message),
            BackendError::Authorization { message } => Self::authorization(message),
            BackendError::Timeout { operation, .. } | BackendError::Rejected { operation, .. } => {
                match operation {
                    BackendOperation::Tokenize => Self::tokenization(error.to_string()),
                    BackendOperation::Authorize => Self::authorization(error.to_string()),
                }
            }
            BackendError::InvalidRequest(_) => Self::invalid_input(error.to_string()),
            BackendError::Other(message) => Self::unknown(message),
        }
    }
}
