//! One-shot decision continuations.
//!
//! When the transaction needs a choice from the caller it hands the Reader
//! Handler a continuation and suspends until the continuation is resolved.
//! Each continuation resolves at most once: a second resolution returns
//! [`Error::ContinuationAlreadyResolved`] and has no effect. Dropping every
//! clone without resolving closes the channel the transaction is waiting on,
//! which the transaction reports as a contract violation.
//!
//! Continuations are `Clone + Send + Sync`, so a handler may answer from any
//! thread, immediately or later.
//!
//! # Examples
//!
//! ```
//! use cardflow_core::Error;
//! use cardflow_engine::decision::ApplicationSelection;
//!
//! let (selection, _answer) = ApplicationSelection::channel(2);
//! assert!(selection.select(1).is_ok());
//! assert!(matches!(
//!     selection.select(0),
//!     Err(Error::ContinuationAlreadyResolved { .. })
//! ));
//! ```

use cardflow_core::{CurrencyCode, Error, Result, TransactionInfo, validate_email};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Receiving side of a continuation, awaited by the transaction.
pub type Answer<T> = oneshot::Receiver<T>;

struct Continuation<T> {
    decision: &'static str,
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Continuation<T> {
    fn channel(decision: &'static str) -> (Self, Answer<T>) {
        let (tx, rx) = oneshot::channel();
        let continuation = Self {
            decision,
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (continuation, rx)
    }

    fn take_sender(&self) -> Option<oneshot::Sender<T>> {
        match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn is_resolved(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.is_resolved() {
            return Err(self.already_resolved());
        }
        Ok(())
    }

    fn resolve(&self, value: T) -> Result<()> {
        let sender = self.take_sender().ok_or_else(|| self.already_resolved())?;
        // The transaction may have ended while the caller was deciding.
        let _ = sender.send(value);
        Ok(())
    }

    fn already_resolved(&self) -> Error {
        Error::ContinuationAlreadyResolved {
            decision: self.decision.to_string(),
        }
    }
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            decision: self.decision,
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("decision", &self.decision)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Index choice among a fixed number of options.
#[derive(Debug, Clone)]
struct IndexChoice {
    inner: Continuation<usize>,
    len: usize,
}

impl IndexChoice {
    fn select(&self, index: usize) -> Result<()> {
        self.inner.ensure_pending()?;
        if index >= self.len {
            return Err(Error::InvalidSelection {
                index,
                len: self.len,
            });
        }
        self.inner.resolve(index)
    }
}

/// Continuation for choosing one of several discovered card readers.
#[derive(Debug, Clone)]
pub struct CardReaderSelection(IndexChoice);

impl CardReaderSelection {
    /// Create a selection over `len` readers and the answer to await.
    pub fn channel(len: usize) -> (Self, Answer<usize>) {
        let (inner, answer) = Continuation::channel("card reader selection");
        (Self(IndexChoice { inner, len }), answer)
    }

    /// Pick the reader at `index`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSelection` for an index out of range (the
    /// continuation stays pending) and `Error::ContinuationAlreadyResolved`
    /// if a choice was already made.
    pub fn select(&self, index: usize) -> Result<()> {
        self.0.select(index)
    }

    /// Whether a choice was already made.
    pub fn is_resolved(&self) -> bool {
        self.0.inner.is_resolved()
    }
}

/// Continuation for choosing one of the card's EMV applications.
#[derive(Debug, Clone)]
pub struct ApplicationSelection(IndexChoice);

impl ApplicationSelection {
    /// Create a selection over `len` applications and the answer to await.
    pub fn channel(len: usize) -> (Self, Answer<usize>) {
        let (inner, answer) = Continuation::channel("application selection");
        (Self(IndexChoice { inner, len }), answer)
    }

    /// Pick the application at `index`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSelection` for an index out of range (the
    /// continuation stays pending) and `Error::ContinuationAlreadyResolved`
    /// if a choice was already made.
    pub fn select(&self, index: usize) -> Result<()> {
        self.0.select(index)
    }

    /// Whether a choice was already made.
    pub fn is_resolved(&self) -> bool {
        self.0.inner.is_resolved()
    }
}

/// Continuation for confirming or declining a recommended reader reset.
#[derive(Debug, Clone)]
pub struct ResetDecision {
    inner: Continuation<bool>,
}

impl ResetDecision {
    /// Create a reset decision and the answer to await.
    pub fn channel() -> (Self, Answer<bool>) {
        let (inner, answer) = Continuation::channel("reader reset");
        (Self { inner }, answer)
    }

    /// Confirm (`true`) or decline (`false`) the reset.
    ///
    /// # Errors
    ///
    /// Returns `Error::ContinuationAlreadyResolved` if already answered.
    pub fn confirm(&self, reset: bool) -> Result<()> {
        self.inner.resolve(reset)
    }

    /// Whether the decision was already made.
    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }
}

/// Continuation for supplying the amount, currency and reference to charge.
#[derive(Debug, Clone)]
pub struct TransactionInfoRequest {
    inner: Continuation<TransactionInfo>,
}

impl TransactionInfoRequest {
    /// Create a request and the answer to await.
    pub fn channel() -> (Self, Answer<TransactionInfo>) {
        let (inner, answer) = Continuation::channel("transaction info");
        (Self { inner }, answer)
    }

    /// Supply the transaction info.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransactionInfo` if the amount is rejected (the
    /// request stays pending) and `Error::ContinuationAlreadyResolved` if
    /// info was already supplied.
    pub fn provide(&self, amount: Decimal, currency: CurrencyCode, reference_id: u64) -> Result<()> {
        self.inner.ensure_pending()?;
        let info = TransactionInfo::new(amount, currency, reference_id)?;
        self.inner.resolve(info)
    }

    /// Whether info was already supplied.
    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }
}

/// Continuation for supplying the payer's e-mail address.
#[derive(Debug, Clone)]
pub struct PayerEmailRequest {
    inner: Continuation<Option<String>>,
}

impl PayerEmailRequest {
    /// Create a request and the answer to await.
    pub fn channel() -> (Self, Answer<Option<String>>) {
        let (inner, answer) = Continuation::channel("payer e-mail");
        (Self { inner }, answer)
    }

    /// Supply the payer's e-mail, or `None` to skip it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEmail` for a malformed address (the request
    /// stays pending) and `Error::ContinuationAlreadyResolved` if already
    /// answered.
    pub fn provide(&self, email: Option<&str>) -> Result<()> {
        self.inner.ensure_pending()?;
        if let Some(address) = email {
            validate_email(address)?;
        }
        self.inner.resolve(email.map(str::to_string))
    }

    /// Whether the request was already answered.
    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }
}
