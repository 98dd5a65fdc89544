//! Core constants shared by the transaction engine and its collaborators.
//!
//! Limits and defaults live here so the engine, the mocks and the
//! configuration layer agree on a single value.
//!
//! # Usage
//!
//! ```
//! use cardflow_core::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_millis(DEFAULT_READER_COMMAND_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 30);
//! ```

// ============================================================================
// Transaction Limits
// ============================================================================

/// Largest amount accepted from a transaction info answer.
///
/// Expressed in minor units (cents) to keep the constant integral.
pub const MAX_TRANSACTION_AMOUNT_MINOR: i64 = 99_999_99;

/// Maximum number of decimal places accepted in a transaction amount.
pub const MAX_AMOUNT_SCALE: u32 = 2;

/// Maximum accepted payer e-mail length (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Number of trailing card number digits left visible when masking.
pub const MASKED_PAN_VISIBLE_DIGITS: usize = 4;

// ============================================================================
// Timeouts
// ============================================================================

/// Default timeout for a single card reader command, in milliseconds.
///
/// Applies to discovery, connection, reader checks, resets and card reads.
/// Waiting for a card to be presented is governed separately by
/// `Config::card_wait_timeout_ms` and is unbounded by default.
pub const DEFAULT_READER_COMMAND_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Diagnostics
// ============================================================================

/// Maximum number of status transitions kept in the state machine history.
///
/// A full read-and-authorize attempt emits six statuses, so 100 entries
/// covers roughly sixteen attempts.
pub const MAX_STATUS_HISTORY: usize = 100;

/// Name of the thread that delivers handler callbacks.
pub const CALLBACK_THREAD_NAME: &str = "cardflow-callbacks";
