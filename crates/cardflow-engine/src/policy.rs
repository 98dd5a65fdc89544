//! Restart and stop policy.
//!
//! After every terminal outcome the driver asks [`evaluate`] what to do next.
//! The function is pure so the precedence rules can be tested in isolation.

use cardflow_core::PolicyConfig;
use std::fmt;

/// How a transaction attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The read (and backend round-trip, if any) succeeded.
    Success,

    /// The reader failed or the card was declined.
    ReaderError,

    /// Tokenization or authorization failed.
    BackendError,

    /// The reader or cardholder cancelled the read.
    Cancelled,

    /// A handler broke its contract or the engine hit an internal fault.
    Aborted,

    /// The reader disconnected.
    ReaderLost,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::ReaderError => "reader_error",
            Self::BackendError => "backend_error",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
            Self::ReaderLost => "reader_lost",
        };
        write!(f, "{}", name)
    }
}

/// What the driver does after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyAction {
    /// Go back to `WAITING_FOR_CARD` with the reader still connected.
    Rearm,

    /// Emit `STOPPED` and release the reader.
    Stop,

    /// End the transaction without emitting anything.
    Idle,
}

/// Decide what follows an outcome.
///
/// An explicit cancel always stops. Otherwise success re-arms under
/// `restart_after_success`, reader errors under `restart_after_other_errors`,
/// and backend errors only when `restart_after_backend_errors` is also set.
/// Reader loss never re-arms or stops, since there is no reader left to
/// release. Everything else falls through to `stop_reader_after_transaction`.
///
/// # Examples
///
/// ```
/// use cardflow_core::PolicyConfig;
/// use cardflow_engine::policy::{Outcome, PolicyAction, evaluate};
///
/// let policy = PolicyConfig::default();
/// assert_eq!(evaluate(&policy, Outcome::Success, false), PolicyAction::Stop);
/// ```
pub fn evaluate(policy: &PolicyConfig, outcome: Outcome, cancel_requested: bool) -> PolicyAction {
    if cancel_requested {
        return PolicyAction::Stop;
    }

    let rearm = match outcome {
        Outcome::Success => policy.restart_after_success,
        Outcome::ReaderError => policy.restart_after_other_errors,
        Outcome::BackendError => {
            policy.restart_after_other_errors && policy.restart_after_backend_errors
        }
        Outcome::ReaderLost => return PolicyAction::Idle,
        Outcome::Cancelled | Outcome::Aborted => false,
    };

    if rearm {
        PolicyAction::Rearm
    } else if policy.stop_reader_after_transaction {
        PolicyAction::Stop
    } else {
        PolicyAction::Idle
    }
}
