use thiserror::Error;

/// Errors returned synchronously at the library boundary.
///
/// These are caller-contract violations and configuration problems. They are
/// returned from the failing call and never delivered to a handler; runtime
/// transaction failures reach handlers as [`ErrorDescriptor`](crate::ErrorDescriptor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Contract violations
    #[error("A transaction is already in progress")]
    TransactionInProgress,

    #[error("Decision continuation already resolved: {decision}")]
    ContinuationAlreadyResolved { decision: String },

    #[error("Selection index {index} out of range for {len} choices")]
    InvalidSelection { index: usize, len: usize },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Attempt data already recorded: {0}")]
    AttemptDataAlreadyRecorded(String),

    // Caller-supplied data
    #[error("Invalid transaction info: {0}")]
    InvalidTransactionInfo(String),

    #[error("Invalid payer e-mail: {0}")]
    InvalidEmail(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Runtime
    #[error("No card reader is available: {0}")]
    ReaderUnavailable(String),

    #[error("No async runtime available to run the transaction")]
    NoRuntime,

    #[error("Callback delivery unavailable: {0}")]
    CallbackDelivery(String),
}

pub type Result<T> = std::result::Result<T, Error>;
