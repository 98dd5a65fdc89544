//! Error descriptors delivered to transaction handlers.
//!
//! Handlers never see raw peripheral or backend faults. Every failure is
//! normalised into an [`ErrorDescriptor`] carrying an [`ErrorKind`] and a
//! human-readable message. Two descriptors are equal when both kind and
//! message match.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a transaction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// The card reader could not be reached or stopped responding.
    CardReaderCommunication,

    /// A card reader command did not complete in time.
    CardReaderTimeout,

    /// The card could not be read or the EMV kernel declined it.
    EmvTransaction,

    /// The backend could not tokenize the card.
    Tokenization,

    /// The backend could not authorize the payment.
    Authorization,

    /// The transaction was cancelled by the cardholder or the device.
    Cancelled,

    /// A caller handler broke its contract (e.g. dropped a decision unanswered).
    ContractViolation,

    /// The caller supplied unusable transaction data.
    InvalidInput,

    /// A failure that fits no other category.
    Unknown,
}

impl ErrorKind {
    /// Whether this kind is reported by the card reader side of the flow.
    ///
    /// Reader-side failures are eligible for the `restart_after_other_errors`
    /// policy; cancellations are reader-side but never restart.
    pub fn is_reader_error(&self) -> bool {
        matches!(
            self,
            Self::CardReaderCommunication
                | Self::CardReaderTimeout
                | Self::EmvTransaction
                | Self::Cancelled
                | Self::Unknown
        )
    }

    /// Whether this kind comes from a backend round-trip.
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Tokenization | Self::Authorization)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CardReaderCommunication => "CardReaderCommunicationError",
            Self::CardReaderTimeout => "CardReaderTimeoutError",
            Self::EmvTransaction => "EmvTransactionError",
            Self::Tokenization => "TokenizationError",
            Self::Authorization => "AuthorizationError",
            Self::Cancelled => "TransactionCancelled",
            Self::ContractViolation => "ContractViolation",
            Self::InvalidInput => "InvalidInput",
            Self::Unknown => "UnknownError",
        };
        write!(f, "{}", name)
    }
}

/// A well-formed failure report handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Failure classification.
    pub kind: ErrorKind,

    /// Human-readable description.
    pub message: String,
}

impl ErrorDescriptor {
    /// Create a descriptor from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Card reader communication failure.
    pub fn card_reader_communication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CardReaderCommunication, message)
    }

    /// Card reader command timeout.
    pub fn card_reader_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CardReaderTimeout, message)
    }

    /// Card read failure or EMV decline.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardflow_core::{ErrorDescriptor, ErrorKind};
    ///
    /// let error = ErrorDescriptor::emv_transaction("UnknownError");
    /// assert_eq!(error.kind, ErrorKind::EmvTransaction);
    /// assert_eq!(error, ErrorDescriptor::emv_transaction("UnknownError"));
    /// ```
    pub fn emv_transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmvTransaction, message)
    }

    /// Backend tokenization failure.
    pub fn tokenization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tokenization, message)
    }

    /// Backend authorization failure.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// Transaction cancelled by the cardholder or device.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Handler contract violation.
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, message)
    }

    /// Unusable caller input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Unclassified failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorDescriptor {}

impl From<crate::Error> for ErrorDescriptor {
    fn from(error: crate::Error) -> Self {
        match error {
            crate::Error::InvalidTransactionInfo(_) | crate::Error::InvalidEmail(_) => {
                Self::invalid_input(error.to_string())
            }
            crate::Error::ContinuationAlreadyResolved { .. }
            | crate::Error::InvalidSelection { .. } => Self::contract_violation(error.to_string()),
            crate::Error::ReaderUnavailable(_) => {
                Self::card_reader_communication(error.to_string())
            }
            other => Self::unknown(other.to_string()),
        }
    }
}
