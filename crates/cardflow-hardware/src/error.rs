//! Error types for card reader operations.
//!
//! Peripheral faults stay inside the hardware layer as [`PeripheralError`].
//! The engine converts them into [`ErrorDescriptor`]s before any handler
//! sees them.

use cardflow_core::ErrorDescriptor;

/// Result type alias for card reader operations.
pub type Result<T> = std::result::Result<T, PeripheralError>;

/// Errors that can occur while driving a card reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeripheralError {
    /// Reader is not connected or the link was lost.
    #[error("Card reader disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Reader communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Invalid data received from the reader.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Reader initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// The card could not be read or the EMV kernel declined it.
    #[error("Card read error: {message}")]
    CardReadError { message: String },

    /// The cardholder or the reader cancelled the operation.
    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl PeripheralError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a new card read error.
    pub fn card_read(message: impl Into<String>) -> Self {
        Self::CardReadError {
            message: message.into(),
        }
    }

    /// Create a new cancelled error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether the reader link itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl From<PeripheralError> for ErrorDescriptor {
    fn from(error: PeripheralError) -> Self {
        match error {
            PeripheralError::Disconnected { .. } | PeripheralError::CommunicationError { .. } => {
                Self::card_reader_communication(error.to_string())
            }
            PeripheralError::Timeout { .. } => Self::card_reader_timeout(error.to_string()),
            // Card read failures surface with the bare kernel message.
            PeripheralError::CardReadError { message } => Self::emv_transaction(message),
            PeripheralError::Cancelled { message } => Self::cancelled(message),
            other => Self::unknown(other.to_string()),
        }
    }
}
