//! Card reader status machine.
//!
//! This module tracks the one current [`CardReaderStatus`] of a payment
//! session, validates every status change against the transition table in
//! [`CardReaderStatus::can_transition_to`], and keeps a bounded history of
//! transitions for diagnostics.
//!
//! # Valid Transitions
//!
//! - NotConnected → (SelectingCardReader → Connecting →) Connected
//! - Connected → CheckingReader → (ConfiguringReader →) WaitingForCard
//! - WaitingForCard → CardDipped → (SelectingApplication →) Tokenizing/Authorizing
//! - WaitingForCard → SwipeDetected → Tokenizing
//! - any presentment or backend status → WaitingForCard (re-arm) or Stopped
//! - any live status → NotConnected (reader lost)
//!
//! The machine does not deliver anything itself. The transaction driver
//! emits each accepted transition to the Reader Handler.
//!
//! # Examples
//!
//! ```
//! use cardflow_core::CardReaderStatus;
//! use cardflow_engine::StatusMachine;
//!
//! let mut machine = StatusMachine::new();
//! assert_eq!(machine.current_status(), CardReaderStatus::NotConnected);
//!
//! machine.transition_to(CardReaderStatus::Connected).unwrap();
//! machine.transition_to(CardReaderStatus::CheckingReader).unwrap();
//! assert!(machine.transition_to(CardReaderStatus::Tokenizing).is_err());
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use cardflow_core::constants::MAX_STATUS_HISTORY;
use cardflow_core::{CardReaderStatus, Error, Result};

/// A single status transition with timestamp.
///
/// # Serialization Note
///
/// The `timestamp` field is not serialized as `Instant` is process-specific.
/// When deserializing, the timestamp will be set to the current time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The status transitioned from.
    pub from: CardReaderStatus,

    /// The status transitioned to.
    pub to: CardReaderStatus,

    /// When the transition occurred.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StatusTransition {
    /// Create a new transition record stamped with the current time.
    pub fn new(from: CardReaderStatus, to: CardReaderStatus) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    /// Time elapsed since this transition.
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Read-only view of the current status, shared with the session.
///
/// The status machine itself is owned by whichever task drives the reader;
/// this handle lets callers read the last accepted status without touching
/// the machine.
#[derive(Debug, Clone)]
pub struct SharedStatus {
    inner: Arc<RwLock<CardReaderStatus>>,
}

impl SharedStatus {
    fn new(status: CardReaderStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    /// Last status accepted by the machine.
    pub fn get(&self) -> CardReaderStatus {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set(&self, status: CardReaderStatus) {
        match self.inner.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }
}

/// Status machine for one card reader.
///
/// # Thread Safety
///
/// The machine is not shared. Exactly one task owns it at a time, which is
/// what serializes status changes; observers use [`SharedStatus`].
#[derive(Debug)]
pub struct StatusMachine {
    /// Current status.
    current_status: CardReaderStatus,

    /// When the current status was entered.
    status_entered_at: Instant,

    /// Recent transitions, oldest first (limited to MAX_STATUS_HISTORY).
    history: VecDeque<StatusTransition>,

    /// Published copy of `current_status`.
    shared: SharedStatus,
}

impl StatusMachine {
    /// Create a machine in the `NotConnected` status.
    pub fn new() -> Self {
        Self {
            current_status: CardReaderStatus::NotConnected,
            status_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_STATUS_HISTORY),
            shared: SharedStatus::new(CardReaderStatus::NotConnected),
        }
    }

    /// Current status.
    pub fn current_status(&self) -> CardReaderStatus {
        self.current_status
    }

    /// Handle that follows the current status.
    pub fn shared_status(&self) -> SharedStatus {
        self.shared.clone()
    }

    /// Time spent in the current status.
    pub fn time_in_current_status(&self) -> Duration {
        self.status_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StatusTransition> {
        &self.history
    }

    /// The last `count` transitions, oldest first.
    pub fn last_transitions(&self, count: usize) -> Vec<StatusTransition> {
        self.history
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }

    /// Whether `target` can be entered from the current status.
    pub fn can_transition_to(&self, target: CardReaderStatus) -> bool {
        self.current_status.can_transition_to(&target)
    }

    /// Transition to a new status, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStatusTransition` if the transition table does
    /// not allow `new_status` from the current status. The machine is left
    /// unchanged.
    pub fn transition_to(&mut self, new_status: CardReaderStatus) -> Result<StatusTransition> {
        if !self.current_status.can_transition_to(&new_status) {
            return Err(Error::InvalidStatusTransition {
                from: self.current_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let transition = StatusTransition::new(self.current_status, new_status);
        self.perform_status_change(new_status, transition.clone());

        Ok(transition)
    }

    /// Return to `NotConnected` without validation.
    ///
    /// Used when a transaction ends without a connected reader and nothing
    /// should be emitted. The reset is recorded in history.
    pub fn reset(&mut self) -> StatusTransition {
        let transition = StatusTransition::new(self.current_status, CardReaderStatus::NotConnected);
        self.perform_status_change(CardReaderStatus::NotConnected, transition.clone());
        transition
    }

    fn perform_status_change(&mut self, new_status: CardReaderStatus, transition: StatusTransition) {
        self.current_status = new_status;
        self.status_entered_at = Instant::now();
        self.shared.set(new_status);
        self.add_to_history(transition);
    }

    fn add_to_history(&mut self, transition: StatusTransition) {
        self.history.push_back(transition);
        if self.history.len() > MAX_STATUS_HISTORY {
            self.history.pop_front();
        }
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}
